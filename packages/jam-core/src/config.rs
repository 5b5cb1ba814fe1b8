//! Runtime configuration for the jam core.
//!
//! [`JamConfig`] groups the tunables shared by the repository, the
//! subscription fan-out and the gateway. All fields have sensible defaults;
//! [`JamConfig::validate`] rejects values that would break at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_DIRECTORY_TIMEOUT_SECS, DEFAULT_JANITOR_INTERVAL_SECS, DEFAULT_LOAD_DEDUP_WINDOW_MS,
    DEFAULT_PORT, DEFAULT_ROOM_IDLE_TTL_SECS, DEFAULT_SUBSCRIPTION_BUFFER,
    WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS,
};

/// Configuration for the jam session synchronizer.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct JamConfig {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    // Fan-out
    /// Capacity of each subscriber's local buffer (messages).
    pub subscription_buffer: usize,

    // Room lifecycle
    /// Window during which a replayed `host:load` for the same track is ignored.
    pub load_dedup_window_ms: u64,

    /// Seconds without mutation after which a room expires (0 = never).
    pub room_idle_ttl_secs: u64,

    /// Interval between janitor sweeps (seconds).
    pub janitor_interval_secs: u64,

    // User Directory
    /// Base URL of the User Directory service. `None` disables lookups.
    pub directory_url: Option<String>,

    /// Timeout for a single directory lookup (seconds).
    pub directory_timeout_secs: u64,

    // WebSocket
    /// WebSocket heartbeat timeout (seconds).
    pub ws_heartbeat_timeout_secs: u64,

    /// Interval between WebSocket heartbeat checks (seconds).
    pub ws_heartbeat_check_interval_secs: u64,

    /// Origin prefixes allowed by CORS. Empty allows any origin.
    pub trusted_origins: Vec<String>,
}

impl Default for JamConfig {
    fn default() -> Self {
        Self {
            preferred_port: DEFAULT_PORT,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            load_dedup_window_ms: DEFAULT_LOAD_DEDUP_WINDOW_MS,
            room_idle_ttl_secs: DEFAULT_ROOM_IDLE_TTL_SECS,
            janitor_interval_secs: DEFAULT_JANITOR_INTERVAL_SECS,
            directory_url: None,
            directory_timeout_secs: DEFAULT_DIRECTORY_TIMEOUT_SECS,
            ws_heartbeat_timeout_secs: WS_HEARTBEAT_TIMEOUT_SECS,
            ws_heartbeat_check_interval_secs: WS_HEARTBEAT_CHECK_INTERVAL_SECS,
            trusted_origins: Vec::new(),
        }
    }
}

impl JamConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.subscription_buffer == 0 {
            return Err("subscription_buffer must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        if self.janitor_interval_secs == 0 {
            return Err("janitor_interval_secs must be >= 1".to_string());
        }
        if self.ws_heartbeat_check_interval_secs == 0 {
            return Err("ws_heartbeat_check_interval_secs must be >= 1".to_string());
        }
        if self.ws_heartbeat_timeout_secs < self.ws_heartbeat_check_interval_secs {
            return Err(
                "ws_heartbeat_timeout_secs must be >= ws_heartbeat_check_interval_secs".to_string(),
            );
        }
        if let Some(url) = &self.directory_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("directory_url must be an http(s) URL, got {url:?}"));
            }
        }
        Ok(())
    }

    /// Idle expiry applied to room keys, or `None` when disabled.
    #[must_use]
    pub fn room_idle_ttl(&self) -> Option<Duration> {
        (self.room_idle_ttl_secs > 0).then(|| Duration::from_secs(self.room_idle_ttl_secs))
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    /// Dedup window for replayed `host:load` commands.
    #[must_use]
    pub fn load_dedup_window(&self) -> Duration {
        Duration::from_millis(self.load_dedup_window_ms)
    }
}
