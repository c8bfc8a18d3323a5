//! Runtime configuration for Agora.
//!
//! `AgoraConfig` represents the top-level `config.toml` that controls bus
//! capacity, stream lifetime fallbacks, and the server bind address.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for an Agora process.
///
/// Loaded from `<data_dir>/config.toml`. All fields have defaults, so an
/// absent or empty file yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgoraConfig {
    /// Bounded event history per bus; oldest entries drop first.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Stream completion fallbacks.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Overrides the derived SQLite URL when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_history_capacity() -> usize {
    5000
}

fn default_bind_addr() -> String {
    "127.0.0.1:7000".to_string()
}

impl Default for AgoraConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            stream: StreamConfig::default(),
            bind_addr: default_bind_addr(),
            database_url: None,
        }
    }
}

/// Timeouts governing when an outward stream closes.
///
/// `grace_ms` runs after the world goes idle to catch same-tick stragglers.
/// `no_events_timeout_ms` closes a stream that never saw any event at all.
/// `max_duration_ms` is the absolute ceiling for a stream that never reaches
/// idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    #[serde(default = "default_no_events_timeout_ms")]
    pub no_events_timeout_ms: u64,

    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

fn default_grace_ms() -> u64 {
    500
}

fn default_no_events_timeout_ms() -> u64 {
    15_000
}

fn default_max_duration_ms() -> u64 {
    60_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            no_events_timeout_ms: default_no_events_timeout_ms(),
            max_duration_ms: default_max_duration_ms(),
        }
    }
}

impl StreamConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn no_events_timeout(&self) -> Duration {
        Duration::from_millis(self.no_events_timeout_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = AgoraConfig::default();
        assert_eq!(config.history_capacity, 5000);
        assert_eq!(config.stream.grace_ms, 500);
        assert_eq!(config.stream.no_events_timeout_ms, 15_000);
        assert_eq!(config.stream.max_duration_ms, 60_000);
        assert_eq!(config.bind_addr, "127.0.0.1:7000");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_config_deserialize_empty_toml() {
        let config: AgoraConfig = toml::from_str("").unwrap();
        assert_eq!(config.history_capacity, 5000);
        assert_eq!(config.stream.no_events_timeout_ms, 15_000);
    }

    #[test]
    fn test_config_deserialize_partial_override() {
        let toml_str = r#"
history_capacity = 100

[stream]
grace_ms = 250
"#;
        let config: AgoraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.stream.grace_ms, 250);
        // untouched fields keep defaults
        assert_eq!(config.stream.max_duration_ms, 60_000);
        assert_eq!(config.bind_addr, "127.0.0.1:7000");
    }

    #[test]
    fn test_stream_config_durations() {
        let stream = StreamConfig::default();
        assert_eq!(stream.grace(), Duration::from_millis(500));
        assert_eq!(stream.no_events_timeout(), Duration::from_secs(15));
        assert_eq!(stream.max_duration(), Duration::from_secs(60));
    }
}
