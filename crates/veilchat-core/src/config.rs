//! Client configuration loaded from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default history page size.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Default timeout for a single history fetch.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Lower PIN length bound.
pub const DEFAULT_MIN_PIN_LEN: usize = 4;

/// Upper PIN length bound.
pub const DEFAULT_MAX_PIN_LEN: usize = 20;

/// Tunables of the messaging client.
///
/// ```toml
/// page_size = 20
/// fetch_timeout_ms = 10000
/// min_pin_len = 4
/// max_pin_len = 20
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Records requested per history page
    pub page_size: usize,
    /// Timeout for one history fetch, in milliseconds
    pub fetch_timeout_ms: u64,
    /// Shortest accepted PIN
    pub min_pin_len: usize,
    /// Longest accepted PIN
    pub max_pin_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            min_pin_len: DEFAULT_MIN_PIN_LEN,
            max_pin_len: DEFAULT_MAX_PIN_LEN,
        }
    }
}

/// Configuration rejected at load time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// TOML did not parse
    #[error("failed to parse config: {reason}")]
    Parse {
        /// Parser message
        reason: String,
    },

    /// A value is out of range
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// Constraint that was violated
        reason: String,
    },
}

impl ClientConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse { reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_pin_len == 0 || self.min_pin_len > self.max_pin_len {
            return Err(ConfigError::Invalid {
                field: "min_pin_len",
                reason: format!("must be in 1..={}", self.max_pin_len),
            });
        }
        Ok(())
    }

    /// Fetch timeout as a `Duration`.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.page_size, 20);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_document_overrides_keys() {
        let config = ClientConfig::from_toml_str("page_size = 50\nmax_pin_len = 8").unwrap();

        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_pin_len, 8);
        assert_eq!(config.min_pin_len, DEFAULT_MIN_PIN_LEN);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let result = ClientConfig::from_toml_str("page_size = 0");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "page_size", .. })));
    }

    #[test]
    fn inverted_pin_bounds_are_rejected() {
        let result = ClientConfig::from_toml_str("min_pin_len = 10\nmax_pin_len = 6");
        assert!(matches!(result, Err(ConfigError::Invalid { field: "min_pin_len", .. })));
    }

    #[test]
    fn wrong_types_fail_to_parse() {
        let result = ClientConfig::from_toml_str("page_size = \"many\"");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
