//! Tracing subscriber setup for processes that embed the bridge
//!
//! The bridge itself only emits `tracing` events. Hosts that do not install a
//! subscriber of their own can call [`setup_logging`] once at startup with the
//! `[logging]` section of their [`BridgeConfig`](crate::config::BridgeConfig).
//! `RUST_LOG` directives are honoured on top of the configured level.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{BridgeError, BridgeResult};

/// Install a global fmt subscriber
///
/// Fails with a configuration error for an unknown level or when a global
/// subscriber is already set.
pub fn setup_logging(settings: &LoggingSettings) -> BridgeResult<()> {
    let filter = env_filter(settings)?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_file(settings.file_info)
        .with_line_number(settings.file_info);

    let installed = if settings.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| BridgeError::config(format!("Logging already initialised: {}", e)))?;

    tracing::info!("Starting callbridge v{}", crate::VERSION);
    Ok(())
}

/// Filter for `settings`, layered over `RUST_LOG`
pub fn env_filter(settings: &LoggingSettings) -> BridgeResult<EnvFilter> {
    let level = parse_log_level(&settings.level)?;
    Ok(EnvFilter::from_default_env().add_directive(level.into()))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> BridgeResult<Level> {
    Level::from_str(level).map_err(|_| BridgeError::config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_env_filter_rejects_unknown_level() {
        let settings = LoggingSettings {
            level: "chatty".to_string(),
            ..Default::default()
        };
        assert!(matches!(env_filter(&settings), Err(BridgeError::Config { .. })));
        assert!(env_filter(&LoggingSettings::default()).is_ok());
    }

    #[test]
    #[serial]
    fn test_second_setup_fails() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            json: true,
            file_info: true,
        };
        // The first call may race another global subscriber; the second never succeeds
        let _ = setup_logging(&settings);
        assert!(matches!(setup_logging(&settings), Err(BridgeError::Config { .. })));
    }
}
