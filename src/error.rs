use thiserror::Error;

/// Main jukebox error type
#[derive(Debug, Error)]
pub enum JukeboxError {
    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Resolution timed out after {seconds}s")]
    ResolutionTimeout { seconds: u64 },

    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl JukeboxError {
    /// Single human-readable line suitable for a chat reply
    pub fn user_message(&self) -> String {
        match self {
            JukeboxError::ResolutionFailed(msg) => {
                format!("Could not find that song: {}", msg)
            }
            JukeboxError::ResolutionTimeout { seconds } => {
                format!("Search took longer than {}s. Please try again.", seconds)
            }
            JukeboxError::ConnectionUnavailable(msg) => {
                format!("Could not connect to voice channel: {}", msg)
            }
            JukeboxError::PlaybackError(msg) => {
                format!("Error playing song: {}. Trying next song...", msg)
            }
            JukeboxError::InvalidRequest(msg) => msg.clone(),
            JukeboxError::Config(err) => err.user_message(),
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            JukeboxError::InvalidRequest(_) => ErrorSeverity::Info,
            JukeboxError::ResolutionFailed(_) => ErrorSeverity::Warning,
            JukeboxError::ResolutionTimeout { .. } => ErrorSeverity::Warning,
            JukeboxError::PlaybackError(_) => ErrorSeverity::Warning,
            JukeboxError::ConnectionUnavailable(_) => ErrorSeverity::Error,
            JukeboxError::Config(_) => ErrorSeverity::Warning,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save jukebox settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }
}
