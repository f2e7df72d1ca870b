use crate::config::{Config, LogFormat};
use crate::error::AppError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(service_name: &str, config: &Config) -> Result<(), AppError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .json()
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    installed.map_err(|e| {
        AppError::ObservabilityError(anyhow::anyhow!(
            "Failed to initialize tracing for service '{}': {}",
            service_name,
            e
        ))
    })?;

    tracing::info!(
        service = service_name,
        log_level = %config.log_level,
        "Tracing initialized"
    );

    Ok(())
}
