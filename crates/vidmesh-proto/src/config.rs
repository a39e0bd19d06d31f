use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::ServerId;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Where the mesh client endpoints live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the client gateway exposing the stream/catalog routes.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Server identity attached to catalog-refresh snapshots.  The refresh
    /// response carries bare metadata records, so the id comes from here.
    #[serde(default)]
    pub catalog_server_id: ServerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Maximum buffered-ahead duration before old data is evicted.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: f64,
    /// Rewind cushion kept behind the playhead when evicting.
    #[serde(default = "default_trim_margin_secs")]
    pub trim_margin_secs: f64,
    /// External player the pipe sink feeds ("-" tells it to read stdin).
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,
    /// Nominal stream rate used to estimate the buffered span when the
    /// player cannot report one.
    #[serde(default = "default_bytes_per_second")]
    pub bytes_per_second: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Engine event queue depth (chunks, tokens, snapshots, completions).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Broadcast queue depth for UI-facing updates.
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            catalog_server_id: 0,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            trim_margin_secs: default_trim_margin_secs(),
            player_command: default_player_command(),
            bytes_per_second: default_bytes_per_second(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            update_capacity: default_update_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_retention_secs() -> f64 {
    30.0
}

fn default_trim_margin_secs() -> f64 {
    10.0
}

fn default_player_command() -> Vec<String> {
    vec!["mpv".to_string(), "-".to_string()]
}

fn default_bytes_per_second() -> u64 {
    // Rough rate for the 720p fMP4 streams the mesh serves
    250_000
}

fn default_event_capacity() -> usize {
    256
}

fn default_update_capacity() -> usize {
    64
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }
}

/// Per-user config directory for the player.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vidmesh")
}

/// Per-user data directory (log files).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vidmesh")
}
