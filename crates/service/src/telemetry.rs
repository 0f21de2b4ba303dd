use thiserror::Error;
use tracing_subscriber::EnvFilter;

use bidbroker_core::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
#[error("failed to install global tracing subscriber: {0}")]
pub struct LoggingInitError(String);

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.trim()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| LoggingInitError(error.to_string()))
}

#[cfg(test)]
mod tests {
    use bidbroker_core::config::{LogFormat, LoggingConfig};

    use super::init_logging;

    #[test]
    fn second_initialization_is_reported_not_panicking() {
        let config = LoggingConfig { level: "debug".to_owned(), format: LogFormat::Json };

        let _ = init_logging(&config);
        let again = init_logging(&config);

        assert!(again.is_err());
        assert!(again
            .err()
            .map(|error| error.to_string().contains("global tracing subscriber"))
            .unwrap_or(false));
    }
}
