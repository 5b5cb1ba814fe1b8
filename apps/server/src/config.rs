//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use jam_core::JamConfig;
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WS server to (0 = first free default port).
    /// Override: `JAM_BIND_PORT`
    pub bind_port: u16,

    /// Base URL of the User Directory service.
    /// Override: `JAM_DIRECTORY_URL`
    pub directory_url: Option<String>,

    /// Seconds of inactivity after which a room expires (0 = never).
    /// Override: `JAM_ROOM_IDLE_TTL`
    pub room_idle_ttl_secs: u64,

    /// Window in milliseconds for ignoring a replayed `host:load`.
    pub load_dedup_window_ms: u64,

    /// Per-subscriber buffer capacity (messages).
    pub subscription_buffer: usize,

    /// Seconds between janitor sweeps.
    pub janitor_interval_secs: u64,

    /// Allowed CORS origin prefixes. Empty allows any origin.
    pub trusted_origins: Vec<String>,

    /// Timeout for a single User Directory lookup (seconds).
    /// Override: `JAM_DIRECTORY_TIMEOUT`
    pub directory_timeout_secs: u64,

    /// Seconds of client silence before a WebSocket is dropped.
    /// Override: `JAM_WS_HEARTBEAT_TIMEOUT`
    pub ws_heartbeat_timeout_secs: u64,

    /// Seconds between WebSocket pings and liveness checks.
    pub ws_heartbeat_check_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = JamConfig::default();
        Self {
            bind_port: core.preferred_port,
            directory_url: None,
            room_idle_ttl_secs: core.room_idle_ttl_secs,
            load_dedup_window_ms: core.load_dedup_window_ms,
            subscription_buffer: core.subscription_buffer,
            janitor_interval_secs: core.janitor_interval_secs,
            trusted_origins: Vec::new(),
            directory_timeout_secs: core.directory_timeout_secs,
            ws_heartbeat_timeout_secs: core.ws_heartbeat_timeout_secs,
            ws_heartbeat_check_interval_secs: core.ws_heartbeat_check_interval_secs,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("JAM_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("JAM_DIRECTORY_URL") {
            if !val.is_empty() {
                self.directory_url = Some(val);
            }
        }

        if let Ok(val) = std::env::var("JAM_ROOM_IDLE_TTL") {
            if let Ok(ttl) = val.parse() {
                self.room_idle_ttl_secs = ttl;
            }
        }

        if let Ok(val) = std::env::var("JAM_DIRECTORY_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.directory_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("JAM_WS_HEARTBEAT_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.ws_heartbeat_timeout_secs = secs;
            }
        }
    }

    /// Converts to jam-core's config type.
    pub fn to_core_config(&self) -> JamConfig {
        JamConfig {
            preferred_port: self.bind_port,
            directory_url: self.directory_url.clone(),
            room_idle_ttl_secs: self.room_idle_ttl_secs,
            load_dedup_window_ms: self.load_dedup_window_ms,
            subscription_buffer: self.subscription_buffer,
            janitor_interval_secs: self.janitor_interval_secs,
            trusted_origins: self.trusted_origins.clone(),
            directory_timeout_secs: self.directory_timeout_secs,
            ws_heartbeat_timeout_secs: self.ws_heartbeat_timeout_secs,
            ws_heartbeat_check_interval_secs: self.ws_heartbeat_check_interval_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = ServerConfig::from_yaml("bind_port: 8080\nroom_idle_ttl_secs: 0\n").unwrap();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.room_idle_ttl_secs, 0);
        assert_eq!(config.subscription_buffer, 100);

        let core = config.to_core_config();
        assert_eq!(core.preferred_port, 8080);
        assert_eq!(core.room_idle_ttl(), None);
    }

    #[test]
    fn trusted_origins_reach_core_config() {
        let config = ServerConfig::from_yaml(
            "trusted_origins:\n  - https://jam.example\ndirectory_url: http://users:8080\n",
        )
        .unwrap();
        let core = config.to_core_config();
        assert_eq!(core.trusted_origins, vec!["https://jam.example".to_string()]);
        assert_eq!(core.directory_url.as_deref(), Some("http://users:8080"));
        assert!(core.validate().is_ok());
    }

    #[test]
    fn timeouts_reach_core_config() {
        let config = ServerConfig::from_yaml(
            "directory_timeout_secs: 2\nws_heartbeat_timeout_secs: 30\nws_heartbeat_check_interval_secs: 3\n",
        )
        .unwrap();
        let core = config.to_core_config();
        assert_eq!(core.directory_timeout_secs, 2);
        assert_eq!(core.ws_heartbeat_timeout_secs, 30);
        assert_eq!(core.ws_heartbeat_check_interval_secs, 3);
        assert!(core.validate().is_ok());
    }

    #[test]
    fn defaults_match_core_defaults() {
        let core = ServerConfig::default().to_core_config();
        let expected = JamConfig::default();
        assert_eq!(core.directory_timeout_secs, expected.directory_timeout_secs);
        assert_eq!(core.ws_heartbeat_timeout_secs, expected.ws_heartbeat_timeout_secs);
        assert_eq!(
            core.ws_heartbeat_check_interval_secs,
            expected.ws_heartbeat_check_interval_secs
        );
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(ServerConfig::from_yaml("bind_port: [").is_err());
    }
}
