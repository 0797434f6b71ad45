use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::JukeboxError;

/// Identifies one voice channel's independent playback context (one per guild)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "guild {}", self.0)
    }
}

/// The requesting user's voice channel, used to (re)connect the output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceContext {
    pub channel_id: u64,
    pub channel_name: String,
    pub requested_by: String,
}

impl VoiceContext {
    pub fn new(channel_id: u64, channel_name: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            channel_id,
            channel_name: channel_name.into(),
            requested_by: requested_by.into(),
        }
    }
}

/// Opaque reference to a playable source, handed to the output layer untouched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamHandle(String);

impl StreamHandle {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn location(&self) -> &str {
        &self.0
    }
}

/// Raw metadata as returned by the search provider.
///
/// Field names follow the `yt-dlp` JSON dump so the provider output can be
/// deserialized directly. A collection result carries its items in `entries`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawTrackMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub entries: Option<Vec<RawTrackMetadata>>,
}

impl RawTrackMetadata {
    /// Collapse a collection to its first entry. Literal first match, no filtering.
    pub fn into_first_entry(self) -> Result<RawTrackMetadata, JukeboxError> {
        match self.entries {
            Some(entries) => entries
                .into_iter()
                .next()
                .ok_or_else(|| JukeboxError::ResolutionFailed("search returned no results".to_string())),
            None => Ok(self),
        }
    }
}

/// Immutable resolved track record ready for playback
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackDescriptor {
    title: String,
    artist: String,
    duration_secs: u64,
    is_live: bool,
    stream: StreamHandle,
}

impl TrackDescriptor {
    pub fn new(
        title: impl Into<String>,
        uploader: &str,
        duration_secs: u64,
        is_live: bool,
        stream: StreamHandle,
    ) -> Self {
        let title = title.into();
        let artist = extract_artist(&title, uploader);
        Self {
            title,
            artist,
            duration_secs,
            is_live,
            stream,
        }
    }

    /// Build a descriptor from a single provider entry
    pub fn from_metadata(raw: RawTrackMetadata) -> Result<Self, JukeboxError> {
        let url = raw
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| JukeboxError::ResolutionFailed("result has no playable stream".to_string()))?;

        let duration_secs = raw.duration.map(|d| d.max(0.0) as u64).unwrap_or(0);

        Ok(Self::new(
            raw.title.unwrap_or_default(),
            raw.uploader.as_deref().unwrap_or(""),
            duration_secs,
            raw.is_live.unwrap_or(false),
            StreamHandle::new(url),
        ))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    /// `m:ss`, or `None` for live streams and unknown durations
    pub fn duration_display(&self) -> Option<String> {
        if self.is_live || self.duration_secs == 0 {
            None
        } else {
            Some(format_duration(self.duration_secs))
        }
    }
}

impl fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.title, self.artist)
    }
}

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+?)\s*[-–]\s*(.+)$").expect("separator pattern compiles"))
}

/// Derive the artist from a `Artist - Song` title, falling back to the uploader.
///
/// The leading segment is assumed to be the artist. This is a heuristic and
/// misfires on titles like `Song - Artist`.
pub fn extract_artist(title: &str, uploader: &str) -> String {
    match separator_pattern().captures(title) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        None => uploader.to_string(),
    }
}

/// Format whole seconds as `m:ss`
pub fn format_duration(total_seconds: u64) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{}:{:02}", minutes, seconds)
}

/// Why an advance was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceCause {
    Normal,
    Error(String),
    SkipRequested,
}

impl AdvanceCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvanceCause::Normal => "normal",
            AdvanceCause::Error(_) => "error",
            AdvanceCause::SkipRequested => "skip",
        }
    }
}

/// Result of a coordinator entry point, as seen by command handlers
#[derive(Debug)]
pub enum CommandOutcome {
    /// Playback of this track began immediately
    Started(TrackDescriptor),
    /// The track waits in queue at this 1-based position
    Queued { track: TrackDescriptor, position: usize },
    /// Skip or stop went through
    Acknowledged(String),
    Rejected(String),
    Failed(JukeboxError),
}

impl CommandOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, CommandOutcome::Started(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, CommandOutcome::Queued { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, CommandOutcome::Rejected(_))
    }
}

/// Point-in-time view of a session for display. May be stale by one element.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub now_playing: Option<TrackDescriptor>,
    pub is_playing: bool,
    pub queue: Vec<TrackDescriptor>,
}

impl QueueSnapshot {
    /// The active track, only while playback is actually in progress
    pub fn current(&self) -> Option<&TrackDescriptor> {
        if self.is_playing {
            self.now_playing.as_ref()
        } else {
            None
        }
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.now_playing.is_none() && !self.is_playing
    }
}
