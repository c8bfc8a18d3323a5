//! Configuration loader for Agora.
//!
//! Reads `config.toml` from the data directory (`~/.agora/` in production)
//! and deserializes it into [`AgoraConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use agora_types::config::AgoraConfig;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `AGORA_DATA_DIR` environment variable
/// 2. `~/.agora`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AGORA_DATA_DIR") {
        return PathBuf::from(dir);
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".agora"),
        Err(_) => PathBuf::from(".agora"),
    }
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`AgoraConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_config(data_dir: &Path) -> AgoraConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "No config.toml found at {}, using defaults",
                config_path.display()
            );
            return AgoraConfig::default();
        }
        Err(err) => {
            tracing::warn!(
                "Failed to read {}: {err}, using defaults",
                config_path.display()
            );
            return AgoraConfig::default();
        }
    };

    match toml::from_str::<AgoraConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            AgoraConfig::default()
        }
    }
}

/// Resolve the SQLite URL for this process.
///
/// The `database_url` field in `config.toml` wins when set; otherwise the
/// URL is derived from the data directory convention.
pub fn resolve_database_url(config: &AgoraConfig, data_dir: &Path) -> String {
    config.database_url.clone().unwrap_or_else(|| {
        format!("sqlite://{}?mode=rwc", data_dir.join("agora.db").display())
    })
}
