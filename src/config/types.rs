//! Engine configuration types

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What activating a file does
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBehavior {
    /// Double-click transfers the file to the other side instead of opening it
    #[serde(default)]
    pub double_click_transfers: bool,
    /// Lowercased extension (no dot) → application
    #[serde(default)]
    pub associations: HashMap<String, String>,
}

impl OpenBehavior {
    pub fn application_for(&self, extension: Option<&str>) -> Option<String> {
        extension.and_then(|ext| self.associations.get(&ext.to_lowercase()).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Directory listing lifetime in the cache
    pub cache_ttl_ms: u64,
    /// Wait before the single automatic reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Size assumed when a source cannot be stat'ed
    pub default_size_estimate: u64,
    /// Claimed throughput of simulated progress
    pub simulated_rate_bps: u64,
    pub simulated_tick_ms: u64,
    /// Buffer size for streaming copies
    pub chunk_size: usize,
    /// Per-handshake SSH connect timeout
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    /// Broadcast channel capacity for engine events
    pub event_capacity: usize,
    pub open_behavior: OpenBehavior,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 10_000,
            reconnect_delay_ms: 2_000,
            default_size_estimate: 1024 * 1024,
            simulated_rate_bps: 2 * 1024 * 1024,
            simulated_tick_ms: 100,
            chunk_size: 64 * 1024,
            connect_timeout_secs: 30,
            keepalive_secs: 30,
            event_capacity: 256,
            open_behavior: OpenBehavior::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn simulated_tick(&self) -> Duration {
        Duration::from_millis(self.simulated_tick_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "reconnectDelayMs": 500, "openBehavior": { "associations": { "pdf": "Preview" } } }"#,
        )
        .unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(500));
        assert_eq!(config.cache_ttl(), Duration::from_secs(10));
        assert_eq!(config.default_size_estimate, 1024 * 1024);
        assert!(!config.open_behavior.double_click_transfers);
        assert_eq!(
            config.open_behavior.application_for(Some("PDF")).as_deref(),
            Some("Preview")
        );
        assert_eq!(config.open_behavior.application_for(None), None);
    }
}
