use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use crate::error::JukeboxError;
use crate::logging::OperationTimer;
use crate::models::{RawTrackMetadata, TrackDescriptor};

/// External search provider
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Look up `query` and return the provider's raw answer, which may be a
    /// collection of candidates.
    async fn search(&self, query: &str) -> Result<RawTrackMetadata, JukeboxError>;
}

/// Resolve a query within `timeout`. Takes the first candidate as-is.
pub async fn resolve_track(
    resolver: &dyn Resolver,
    query: &str,
    timeout: Duration,
) -> Result<TrackDescriptor, JukeboxError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(JukeboxError::InvalidRequest("Please provide a song name".to_string()));
    }

    let timer = OperationTimer::new(format!("resolve '{}'", query));
    let raw = match tokio::time::timeout(timeout, resolver.search(query)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("Resolution of '{}' timed out after {:?}", query, timeout);
            return Err(JukeboxError::ResolutionTimeout {
                seconds: timeout.as_secs(),
            });
        }
    };
    timer.finish_with_threshold(Duration::from_secs(5));

    let track = TrackDescriptor::from_metadata(raw.into_first_entry()?)?;
    debug!("Resolved '{}' to {}", query, track);
    Ok(track)
}

/// Runs `yt-dlp` and parses its JSON dump
pub struct YtDlpResolver {
    program: String,
    search_prefix: String,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>, search_prefix: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            search_prefix: search_prefix.into(),
        }
    }

    fn target(&self, query: &str) -> String {
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("{}{}", self.search_prefix, query)
        }
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn search(&self, query: &str) -> Result<RawTrackMetadata, JukeboxError> {
        let output = Command::new(&self.program)
            .args(["-J", "--no-playlist", "--no-warnings", "-f", "bestaudio/best"])
            .arg(self.target(query))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| JukeboxError::ResolutionFailed(format!("could not run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("").trim();
            return Err(JukeboxError::ResolutionFailed(if reason.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                reason.to_string()
            }));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| JukeboxError::ResolutionFailed(format!("unreadable provider output: {}", e)))
    }
}

/// Resolves every query to a synthetic track. No network access.
pub struct OfflineResolver {
    duration_secs: u64,
}

impl OfflineResolver {
    pub fn new(duration_secs: u64) -> Self {
        Self { duration_secs }
    }
}

#[async_trait]
impl Resolver for OfflineResolver {
    async fn search(&self, query: &str) -> Result<RawTrackMetadata, JukeboxError> {
        Ok(RawTrackMetadata {
            title: Some(query.to_string()),
            uploader: Some("Offline Library".to_string()),
            duration: Some(self.duration_secs as f64),
            is_live: Some(false),
            url: Some(format!("offline://{}", query.replace(' ', "-").to_lowercase())),
            entries: None,
        })
    }
}
