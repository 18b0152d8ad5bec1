//! Configuration traits and utilities.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{BrokerConfig, LoggingConfig};

/// Trait for top-level bridge configuration types.
///
/// Implement this for a bridge's configuration struct to get JSON5 loading
/// with validation and access to the settings the pipeline needs.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use fieldgate_pipeline::{BridgeConfig, BrokerConfig, LoggingConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub broker: BrokerConfig,
///     pub logging: LoggingConfig,
///     pub poll_interval_ms: u64,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn broker(&self) -> &BrokerConfig {
///         &self.broker
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn poll_interval(&self) -> Duration {
///         Duration::from_millis(self.poll_interval_ms)
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the gateway broker configuration.
    fn broker(&self) -> &BrokerConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Delay between two poll cycles.
    fn poll_interval(&self) -> Duration;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. The default checks the broker
    /// settings and a non-zero poll interval.
    fn validate(&self) -> Result<()> {
        self.broker()
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;

        if self.poll_interval().is_zero() {
            return Err(BridgeError::validation("Poll interval must be positive"));
        }

        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        broker: BrokerConfig,
        #[serde(default)]
        logging: LoggingConfig,
        poll_interval_ms: u64,
    }

    impl BridgeConfig for TestConfig {
        fn broker(&self) -> &BrokerConfig {
            &self.broker
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(self.poll_interval_ms)
        }
    }

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "fieldgate-{}-{}.json5",
            name,
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_load_valid_config() {
        let path = write_config(
            "valid",
            r#"{
                // gateway
                broker: { host: "tb.local", access_token: "A1", client_id: "gw" },
                poll_interval_ms: 1000,
            }"#,
        );

        let config = TestConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.broker().host, "tb.local");
        assert_eq!(config.broker().port, 1883);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.logging().level, "info");
    }

    #[test]
    fn test_load_rejects_missing_token() {
        let path = write_config(
            "no-token",
            r#"{ broker: { host: "tb.local", client_id: "gw" }, poll_interval_ms: 1000 }"#,
        );

        let result = TestConfig::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_load_rejects_zero_interval() {
        let path = write_config(
            "zero-interval",
            r#"{ broker: { host: "tb.local", access_token: "A1", client_id: "gw" }, poll_interval_ms: 0 }"#,
        );

        let result = TestConfig::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let path = write_config("malformed", "{ broker: ");

        let result = TestConfig::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }
}
