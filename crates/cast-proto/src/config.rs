use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Where the streaming server lives (`/metadata`, `/hls`, `/vlc`, `/static`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Local control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Hand HLS URLs straight to the output instead of the tuned engine.
    #[serde(default = "default_native_hls")]
    pub native_hls: bool,
    /// Volume (0-100) used when nothing has been persisted yet.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_active_interval_ms")]
    pub active_interval_ms: u64,
    #[serde(default = "default_favorites_interval_secs")]
    pub favorites_interval_secs: u64,
}

/// Which persistence layout backs the profile manager.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Multi-profile JSON key-value file.
    #[default]
    Kv,
    /// Legacy single-listener cookie jar.
    Cookie,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_cookie_file")]
    pub cookie_file: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// TOML channel table (`[[channel]]` entries).
    #[serde(default = "default_channels_toml")]
    pub channels_toml: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            native_hls: default_native_hls(),
            default_volume: default_volume(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: default_active_interval_ms(),
            favorites_interval_secs: default_favorites_interval_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            state_file: default_state_file(),
            cookie_file: default_cookie_file(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            channels_toml: default_channels_toml(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8888".to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_native_hls() -> bool {
    false
}

fn default_volume() -> u8 {
    100
}

fn default_active_interval_ms() -> u64 {
    2000
}

fn default_favorites_interval_secs() -> u64 {
    15
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("storage.json")
}

fn default_cookie_file() -> PathBuf {
    platform::data_dir().join("cookies.txt")
}

fn default_cache_dir() -> PathBuf {
    platform::cache_dir()
}

fn default_channels_toml() -> PathBuf {
    platform::config_dir().join("channels.toml")
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
        platform::config_dir().join("config.toml")
    }
}
