//! Runtime configuration
//!
//! One JSON file holds every section; missing sections and fields take their
//! defaults. A few endpoints can be overridden from the environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionConfig;

pub const ENV_RELAY_URL: &str = "AUTHLINK_RELAY_URL";
pub const ENV_LEDGER_URL: &str = "AUTHLINK_LEDGER_URL";
pub const ENV_CHAIN_ID: &str = "AUTHLINK_CHAIN_ID";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// `ws://` or `wss://` root of the relay.
    pub relay_url: String,
    /// How long the requester waits for the signer's reply.
    #[serde(with = "crate::encoding::duration_secs")]
    pub response_timeout: Duration,
    /// Longest session a signer agrees to authorize.
    #[serde(with = "crate::encoding::duration_secs")]
    pub max_session_ttl: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8787".into(),
            response_timeout: Duration::from_secs(60),
            max_session_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub base_url: String,
    pub chain_id: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            chain_id: "dev-1".into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub session: SessionConfig,
    pub pairing: PairingConfig,
    pub ledger: LedgerConfig,
}

impl AuthConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        let config: AuthConfig =
            serde_json::from_slice(&data).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Apply overrides from `lookup`, called with each variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RELAY_URL) {
            log::debug!("Relay URL overridden by {}", ENV_RELAY_URL);
            self.pairing.relay_url = url;
        }
        if let Some(url) = lookup(ENV_LEDGER_URL) {
            log::debug!("Ledger URL overridden by {}", ENV_LEDGER_URL);
            self.ledger.base_url = url;
        }
        if let Some(chain_id) = lookup(ENV_CHAIN_ID) {
            self.ledger.chain_id = chain_id;
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("session.poll_interval must be positive".into()));
        }
        if self.pairing.response_timeout.is_zero() {
            return Err(ConfigError::Invalid("pairing.response_timeout must be positive".into()));
        }
        if self.session.default_ttl > self.pairing.max_session_ttl {
            return Err(ConfigError::Invalid(
                "session.default_ttl exceeds pairing.max_session_ttl".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.session.default_ttl, Duration::from_secs(86_400));
        assert_eq!(config.session.poll_interval, Duration::from_secs(1));
        assert_eq!(config.pairing.response_timeout, Duration::from_secs(60));
        assert_eq!(config.pairing.max_session_ttl, Duration::from_secs(2_592_000));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authlink.json");
        std::fs::write(&path, r#"{"pairing":{"response_timeout":5},"ledger":{"chain_id":"main-1"}}"#).unwrap();

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.pairing.response_timeout, Duration::from_secs(5));
        assert_eq!(config.pairing.relay_url, "ws://127.0.0.1:8787");
        assert_eq!(config.ledger.chain_id, "main-1");
        assert_eq!(config.session.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("authlink.json");
        let mut config = AuthConfig::default();
        config.ledger.base_url = "https://ledger.example".into();
        config.save(&path).unwrap();

        let loaded = AuthConfig::load(&path).unwrap();
        assert_eq!(loaded.ledger.base_url, "https://ledger.example");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authlink.json");
        std::fs::write(&path, r#"{"session":{"poll_interval":0}}"#).unwrap();
        assert!(matches!(AuthConfig::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{"session":{"default_ttl":99999999}}"#).unwrap();
        assert!(matches!(AuthConfig::load(&path), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            AuthConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_RELAY_URL, "wss://relay.example"),
            (ENV_CHAIN_ID, "test-9"),
        ]
        .into_iter()
        .collect();

        let mut config = AuthConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.pairing.relay_url, "wss://relay.example");
        assert_eq!(config.ledger.chain_id, "test-9");
        assert_eq!(config.ledger.base_url, "http://127.0.0.1:8080");
    }
}
