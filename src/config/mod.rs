use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Jukebox configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JukeboxConfig {
    pub command_prefix: String,
    pub search_prefix: String,
    pub resolve_timeout_secs: u64,
    pub announce_delay_ms: u64,
    pub disconnect_delay_ms: u64,
    pub stop_delay_ms: u64,
    pub reconnect_settle_ms: u64,
    pub ytdlp_path: String,
    pub simulated_track_secs: Option<u64>,
}

impl Default for JukeboxConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            search_prefix: "ytsearch:".to_string(),
            resolve_timeout_secs: 30,
            announce_delay_ms: 500,
            disconnect_delay_ms: 1500,
            stop_delay_ms: 500,
            reconnect_settle_ms: 500,
            ytdlp_path: "yt-dlp".to_string(),
            simulated_track_secs: None,
        }
    }
}

impl JukeboxConfig {
    /// All coordinator delays zeroed, for driving the state machine in tests
    pub fn immediate() -> Self {
        Self {
            announce_delay_ms: 0,
            disconnect_delay_ms: 0,
            stop_delay_ms: 0,
            reconnect_settle_ms: 0,
            ..Self::default()
        }
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn announce_delay(&self) -> Duration {
        Duration::from_millis(self.announce_delay_ms)
    }

    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: JukeboxConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path).unwrap_or_default();

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Use an explicit file instead of the per-user default location
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &JukeboxConfig {
        &self.config
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut JukeboxConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn set_resolve_timeout(&mut self, seconds: u64) -> Result<(), ConfigError> {
        self.update_config(|config| config.resolve_timeout_secs = seconds.max(1))
    }

    pub fn set_command_prefix(&mut self, prefix: &str) -> Result<(), ConfigError> {
        self.update_config(|config| config.command_prefix = prefix.to_string())
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = JukeboxConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("guild-jukebox");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<JukeboxConfig, ConfigError> {
        if !path.exists() {
            return Ok(JukeboxConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: JukeboxConfig = toml::from_str(&config_content)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
