//! Service configuration read from `NETWORK_MAP_*` environment variables

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Invalid configuration value
#[derive(Error, Debug, PartialEq, Eq)]
#[error("{key} has invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Network map service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMapConfig {
    /// Port the HTTP server binds to
    pub port: u16,
    /// Maximum tracing level
    pub log_level: String,
    /// `sqlite:` URL of the relational store; in-memory store when unset
    pub database_url: Option<String>,
    /// Directory the trust anchors are persisted in; ephemeral when unset
    pub keys_dir: Option<PathBuf>,
    /// Directory scanned for notary node-info files
    pub notaries_dir: Option<PathBuf>,
    /// Number of parameter versions that stay resolvable, current included
    pub parameters_history: usize,
    /// Upper bound on outstanding certificate requests
    pub max_pending_requests: usize,
    /// Validity of issued participant certificates
    pub cert_validity_days: u32,
}

impl Default for NetworkMapConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".into(),
            database_url: None,
            keys_dir: None,
            notaries_dir: None,
            parameters_history: 10,
            max_pending_requests: 10_000,
            cert_validity_days: 500,
        }
    }
}

impl NetworkMapConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            port: parse_or(&non_empty, "NETWORK_MAP_PORT", defaults.port)?,
            log_level: non_empty("NETWORK_MAP_LOG_LEVEL").unwrap_or(defaults.log_level),
            database_url: non_empty("NETWORK_MAP_DATABASE_URL"),
            keys_dir: non_empty("NETWORK_MAP_KEYS_DIR").map(PathBuf::from),
            notaries_dir: non_empty("NETWORK_MAP_NOTARIES_DIR").map(PathBuf::from),
            parameters_history: parse_or(
                &non_empty,
                "NETWORK_MAP_PARAMS_HISTORY",
                defaults.parameters_history,
            )?,
            max_pending_requests: parse_or(
                &non_empty,
                "NETWORK_MAP_MAX_PENDING",
                defaults.max_pending_requests,
            )?,
            cert_validity_days: parse_or(
                &non_empty,
                "NETWORK_MAP_CERT_VALIDITY_DAYS",
                defaults.cert_validity_days,
            )?,
        };

        // A bump must leave the previous version resolvable
        for (key, value, minimum) in [
            ("NETWORK_MAP_PARAMS_HISTORY", config.parameters_history, 2),
            ("NETWORK_MAP_MAX_PENDING", config.max_pending_requests, 1),
            ("NETWORK_MAP_CERT_VALIDITY_DAYS", config.cert_validity_days as usize, 1),
        ] {
            if value < minimum {
                return Err(ConfigError {
                    key: key.into(),
                    value: value.to_string(),
                    reason: format!("must be at least {}", minimum),
                });
            }
        }

        if let Some(url) = &config.database_url {
            if !url.starts_with("sqlite:") {
                return Err(ConfigError {
                    key: "NETWORK_MAP_DATABASE_URL".into(),
                    value: url.clone(),
                    reason: "only sqlite: URLs are supported".into(),
                });
            }
        }

        Ok(config)
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            key: key.into(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = NetworkMapConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, NetworkMapConfig::default());
        assert_eq!(config.port, 8080);
        assert_eq!(config.parameters_history, 10);
        assert_eq!(config.max_pending_requests, 10_000);
        assert_eq!(config.cert_validity_days, 500);
    }

    #[test]
    fn test_values_from_environment() {
        let config = NetworkMapConfig::from_lookup(lookup(&[
            ("NETWORK_MAP_PORT", "9090"),
            ("NETWORK_MAP_DATABASE_URL", "sqlite://netmap.db"),
            ("NETWORK_MAP_KEYS_DIR", "/var/lib/netmap/keys"),
            ("NETWORK_MAP_MAX_PENDING", "5"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.database_url.as_deref(), Some("sqlite://netmap.db"));
        assert_eq!(config.keys_dir, Some(PathBuf::from("/var/lib/netmap/keys")));
        assert_eq!(config.max_pending_requests, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = NetworkMapConfig::from_lookup(lookup(&[("NETWORK_MAP_PORT", "eighty")]))
            .unwrap_err();
        assert_eq!(err.key, "NETWORK_MAP_PORT");

        assert!(NetworkMapConfig::from_lookup(lookup(&[("NETWORK_MAP_PARAMS_HISTORY", "0")]))
            .is_err());
        assert!(NetworkMapConfig::from_lookup(lookup(&[(
            "NETWORK_MAP_DATABASE_URL",
            "postgres://localhost/netmap"
        )]))
        .is_err());
    }

    #[test]
    fn test_parameter_history_needs_two_versions() {
        let err =
            NetworkMapConfig::from_lookup(lookup(&[("NETWORK_MAP_PARAMS_HISTORY", "1")]))
                .unwrap_err();
        assert_eq!(err.key, "NETWORK_MAP_PARAMS_HISTORY");
        assert_eq!(err.value, "1");

        let config =
            NetworkMapConfig::from_lookup(lookup(&[("NETWORK_MAP_PARAMS_HISTORY", "2")])).unwrap();
        assert_eq!(config.parameters_history, 2);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config =
            NetworkMapConfig::from_lookup(lookup(&[("NETWORK_MAP_DATABASE_URL", "  ")])).unwrap();
        assert!(config.database_url.is_none());
    }
}
