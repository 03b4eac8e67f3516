//! Environment-driven configuration for [`HttpTransport`](crate::HttpTransport).
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `COURIER_HTTP_TIMEOUT_MS` | Whole-request timeout in milliseconds | 30000 |
//! | `COURIER_HTTP_CONNECT_TIMEOUT_MS` | Connect timeout in milliseconds | 10000 |
//! | `COURIER_HTTP_USER_AGENT` | `User-Agent` header | `courier/<version>` |

use std::time::Duration;

use crate::error::ConfigError;

/// Whole-request timeout variable
pub const TIMEOUT_VAR: &str = "COURIER_HTTP_TIMEOUT_MS";
/// Connect timeout variable
pub const CONNECT_TIMEOUT_VAR: &str = "COURIER_HTTP_CONNECT_TIMEOUT_MS";
/// User agent variable
pub const USER_AGENT_VAR: &str = "COURIER_HTTP_USER_AGENT";

/// Default `User-Agent` header
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// HTTP transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// `User-Agent` header sent with every request
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpTransportConfig {
    /// Load configuration from the process environment
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unusable value
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unusable value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(TIMEOUT_VAR) {
            config.timeout = parse_millis(TIMEOUT_VAR, value)?;
        }
        if let Some(value) = lookup(CONNECT_TIMEOUT_VAR) {
            config.connect_timeout = parse_millis(CONNECT_TIMEOUT_VAR, value)?;
        }
        if let Some(value) = lookup(USER_AGENT_VAR) {
            config.user_agent = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Validation("timeout must be > 0".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "connect_timeout must be > 0".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user_agent cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_millis(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(millis) => Ok(Duration::from_millis(millis)),
        Err(e) => Err(ConfigError::InvalidVar {
            var,
            value,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = HttpTransportConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, HttpTransportConfig::default());
        assert!(config.user_agent.starts_with("courier/"));
    }

    #[test]
    fn test_overrides() {
        let config = HttpTransportConfig::from_lookup(lookup(&[
            (TIMEOUT_VAR, "1500"),
            (CONNECT_TIMEOUT_VAR, " 250 "),
            (USER_AGENT_VAR, "billing-sync/2"),
        ]))
        .unwrap();

        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.user_agent, "billing-sync/2");
    }

    #[test]
    fn test_rejects_non_numeric_timeout() {
        let err = HttpTransportConfig::from_lookup(lookup(&[(TIMEOUT_VAR, "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar { var: TIMEOUT_VAR, ref value, .. } if value == "soon"
        ));
    }

    #[test]
    fn test_rejects_zero_timeout_and_blank_agent() {
        assert!(matches!(
            HttpTransportConfig::from_lookup(lookup(&[(CONNECT_TIMEOUT_VAR, "0")])),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            HttpTransportConfig::from_lookup(lookup(&[(USER_AGENT_VAR, "  ")])),
            Err(ConfigError::Validation(_))
        ));
    }
}
