//! service-core: Shared infrastructure for the subscription services.
pub mod config;
pub mod error;
pub mod observability;
pub mod promise;

pub use serde;
pub use tokio;
pub use tracing;
