//! Process configuration loaded from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required unless `USE_IN_MEMORY_STORE` is true |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `LOCK_TIMEOUT_SECS` | `10` |
//! | `LISTEN_ADDR` | `0.0.0.0:8080` |
//! | `API_KEYS` | empty (comma separated; empty disables auth) |
//! | `USE_IN_MEMORY_STORE` | `false` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::DEFAULT_LOCK_TIMEOUT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub lock_timeout: Duration,
    pub listen_addr: String,
    pub api_keys: Vec<String>,
    pub use_in_memory: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            listen_addr: "0.0.0.0:8080".to_string(),
            api_keys: Vec::new(),
            use_in_memory: false,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(flag) = get("USE_IN_MEMORY_STORE") {
            config.use_in_memory = parse_bool("USE_IN_MEMORY_STORE", &flag)?;
        }
        config.database_url = get("DATABASE_URL");
        if config.database_url.is_none() && !config.use_in_memory {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        if let Some(raw) = get("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("DATABASE_MAX_CONNECTIONS", raw)),
            };
        }

        if let Some(raw) = get("LOCK_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid("LOCK_TIMEOUT_SECS", raw.clone()))?;
            config.lock_timeout = Duration::from_secs(secs);
        }

        if let Some(addr) = get("LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(raw) = get("API_KEYS") {
            config.api_keys = raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { key, value }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(invalid(key, raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<LedgerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_database_url() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/ledger")]).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/ledger"));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.lock_timeout, Duration::from_secs(10));
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert!(config.api_keys.is_empty());
        assert!(!config.use_in_memory);
    }

    #[test]
    fn database_url_is_required_for_postgres() {
        assert_eq!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
        assert!(load(&[("USE_IN_MEMORY_STORE", "true")]).is_ok());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("USE_IN_MEMORY_STORE", "1"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("LOCK_TIMEOUT_SECS", "3"),
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("API_KEYS", " alpha, ,beta "),
        ])
        .unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.lock_timeout, Duration::from_secs(3));
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.api_keys, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(
            load(&[("USE_IN_MEMORY_STORE", "true"), ("LOCK_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::Invalid {
                key: "LOCK_TIMEOUT_SECS",
                value: "soon".to_string()
            })
        );
        assert!(load(&[("USE_IN_MEMORY_STORE", "maybe")]).is_err());
        assert!(load(&[("USE_IN_MEMORY_STORE", "yes"), ("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
    }
}
