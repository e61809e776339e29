//! Runtime configuration (`config.json` plus CLI overrides)

use crate::crypto;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The only cipher method this build speaks.
pub const DEFAULT_METHOD: &str = "aes-256-cfb";

/// Immutable-after-startup configuration shared by both endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tunnel server host the local endpoint dials
    pub server: String,

    /// Tunnel server port
    pub server_port: u16,

    /// Local SOCKS5 port
    pub local_port: u16,

    /// Shared password; the cipher key is SHA-256 of it
    pub password: String,

    /// Cipher method name
    pub method: String,

    /// Idle timeout in seconds for established tunnels
    pub timeout: u64,

    /// Plain HTTP proxy port (local endpoint only)
    pub http_port: u16,

    /// Monitor HTTP port
    pub monitor_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: "127.0.0.1".to_string(),
            server_port: 8388,
            local_port: 1080,
            password: String::new(),
            method: DEFAULT_METHOD.to_string(),
            timeout: 600,
            http_port: 8087,
            monitor_port: 8088,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing file is an error here;
    /// callers decide whether an implicit default path may fall back to
    /// `Config::default()`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Validate after CLI overrides have been applied.
    pub fn validate(&self) -> Result<()> {
        if self.method != DEFAULT_METHOD {
            return Err(Error::config(format!(
                "unsupported cipher method: {} (only {} is available)",
                self.method, DEFAULT_METHOD
            )));
        }
        if self.password.is_empty() {
            return Err(Error::config("password must not be empty"));
        }
        Ok(())
    }

    /// Cipher key derived from the password.
    pub fn key(&self) -> [u8; crypto::KEY_LEN] {
        crypto::derive_key(&self.password)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server, "127.0.0.1");
        assert_eq!(config.server_port, 8388);
        assert_eq!(config.local_port, 1080);
        assert_eq!(config.method, DEFAULT_METHOD);
        assert_eq!(config.timeout, 600);
        assert_eq!(config.http_port, 8087);
        assert_eq!(config.monitor_port, 8088);
    }

    #[test]
    fn test_parse_with_partial_keys() {
        let json = r#"{
            "server": "10.0.0.2",
            "server_port": 9000,
            "password": "secret"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server, "10.0.0.2");
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.password, "secret");
        assert_eq!(config.local_port, 1080);
    }

    #[test]
    fn test_validate_rejects_unknown_method() {
        let config = Config {
            password: "secret".to_string(),
            method: "table".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_password() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_key_matches_derivation() {
        let config = Config {
            password: "secret".to_string(),
            ..Config::default()
        };
        assert_eq!(config.key(), crypto::derive_key("secret"));
    }
}
