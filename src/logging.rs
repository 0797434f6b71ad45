use log::{info, warn, error, debug, trace};
use std::time::{Duration, Instant};
use std::sync::{Arc, Mutex};
use std::collections::VecDeque;
use chrono::{DateTime, Utc};

use crate::models::{AdvanceCause, SessionId};

/// Session event for logging and debugging
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub session: SessionId,
    pub event_type: SessionEventType,
    pub cause: Option<AdvanceCause>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventType {
    TrackQueued,
    TrackStarted,
    Advance,
    StaleCompletion,
    SkipRequested,
    Stopped,
    QueueFinished,
    Disconnected,
    PlaybackError,
    ConnectionFailed,
    NotifyFailed,
}

impl SessionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventType::TrackQueued => "TRACK_QUEUED",
            SessionEventType::TrackStarted => "TRACK_STARTED",
            SessionEventType::Advance => "ADVANCE",
            SessionEventType::StaleCompletion => "STALE_COMPLETION",
            SessionEventType::SkipRequested => "SKIP_REQUESTED",
            SessionEventType::Stopped => "STOPPED",
            SessionEventType::QueueFinished => "QUEUE_FINISHED",
            SessionEventType::Disconnected => "DISCONNECTED",
            SessionEventType::PlaybackError => "PLAYBACK_ERROR",
            SessionEventType::ConnectionFailed => "CONNECTION_FAILED",
            SessionEventType::NotifyFailed => "NOTIFY_FAILED",
        }
    }
}

/// Logger for jukebox sessions, with a bounded history of recent events
#[derive(Clone)]
pub struct JukeboxLogger {
    events: Arc<Mutex<VecDeque<SessionEvent>>>,
    max_events: usize,
}

impl Default for JukeboxLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl JukeboxLogger {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: 1000,
        }
    }

    /// Initialize logging system with appropriate log level
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var("JUKEBOX_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        match log_level.to_lowercase().as_str() {
            "trace" => builder.filter_level(log::LevelFilter::Trace),
            "debug" => builder.filter_level(log::LevelFilter::Debug),
            "info" => builder.filter_level(log::LevelFilter::Info),
            "warn" => builder.filter_level(log::LevelFilter::Warn),
            "error" => builder.filter_level(log::LevelFilter::Error),
            _ => builder.filter_level(log::LevelFilter::Info),
        };

        builder.try_init()?;

        info!("Jukebox logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Log a session event
    pub fn log_event(
        &self,
        session: SessionId,
        event_type: SessionEventType,
        cause: Option<AdvanceCause>,
        details: String,
    ) {
        match event_type {
            SessionEventType::TrackQueued
            | SessionEventType::TrackStarted
            | SessionEventType::Stopped
            | SessionEventType::QueueFinished
            | SessionEventType::Disconnected => {
                info!("[{}] [{}] {}", session, event_type.as_str(), details);
            }
            SessionEventType::Advance | SessionEventType::SkipRequested => {
                debug!("[{}] [{}] {}", session, event_type.as_str(), details);
            }
            SessionEventType::StaleCompletion => {
                trace!("[{}] [{}] {}", session, event_type.as_str(), details);
            }
            SessionEventType::NotifyFailed | SessionEventType::PlaybackError => {
                warn!("[{}] [{}] {}", session, event_type.as_str(), details);
            }
            SessionEventType::ConnectionFailed => {
                error!("[{}] [{}] {}", session, event_type.as_str(), details);
            }
        }

        let event = SessionEvent {
            timestamp: Utc::now(),
            session,
            event_type,
            cause,
            details,
        };

        let mut events = self.events.lock().unwrap();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_track_queued(&self, session: SessionId, track: &str, position: usize) {
        self.log_event(
            session,
            SessionEventType::TrackQueued,
            None,
            format!("Queued '{}' at position {}", track, position),
        );
    }

    pub fn log_track_started(&self, session: SessionId, track: &str, ticket: u64) {
        self.log_event(
            session,
            SessionEventType::TrackStarted,
            None,
            format!("Started '{}' (ticket {})", track, ticket),
        );
    }

    pub fn log_advance(&self, session: SessionId, cause: &AdvanceCause, remaining: usize) {
        self.log_event(
            session,
            SessionEventType::Advance,
            Some(cause.clone()),
            format!("Advance ({}) with {} queued", cause.as_str(), remaining),
        );
    }

    pub fn log_stale_completion(&self, session: SessionId, ticket: u64) {
        self.log_event(
            session,
            SessionEventType::StaleCompletion,
            None,
            format!("Ignoring completion for ticket {}", ticket),
        );
    }

    pub fn log_skip_requested(&self, session: SessionId, track: Option<&str>) {
        self.log_event(
            session,
            SessionEventType::SkipRequested,
            None,
            format!("Skip requested for '{}'", track.unwrap_or("unknown")),
        );
    }

    pub fn log_stopped(&self, session: SessionId, dropped: usize) {
        self.log_event(
            session,
            SessionEventType::Stopped,
            None,
            format!("Playback stopped, {} queued tracks dropped", dropped),
        );
    }

    pub fn log_queue_finished(&self, session: SessionId) {
        self.log_event(
            session,
            SessionEventType::QueueFinished,
            None,
            "Queue finished".to_string(),
        );
    }

    pub fn log_disconnected(&self, session: SessionId, error: Option<&str>) {
        let details = match error {
            Some(err) => format!("Disconnect failed: {}", err),
            None => "Disconnected from voice".to_string(),
        };
        self.log_event(session, SessionEventType::Disconnected, None, details);
    }

    pub fn log_playback_error(&self, session: SessionId, error: &str) {
        self.log_event(
            session,
            SessionEventType::PlaybackError,
            None,
            format!("Player error caused song to end: {}", error),
        );
    }

    pub fn log_connection_failed(&self, session: SessionId, reason: &str) {
        self.log_event(
            session,
            SessionEventType::ConnectionFailed,
            None,
            reason.to_string(),
        );
    }

    pub fn log_notify_failed(&self, session: SessionId, error: &str) {
        self.log_event(
            session,
            SessionEventType::NotifyFailed,
            None,
            format!("Error sending message: {}", error),
        );
    }

    /// Get recent events, oldest first
    pub fn get_recent_events(&self, count: usize) -> Vec<SessionEvent> {
        let events = self.events.lock().unwrap();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    /// All retained events for one session, oldest first
    pub fn events_for(&self, session: SessionId) -> Vec<SessionEvent> {
        let events = self.events.lock().unwrap();
        events.iter().filter(|e| e.session == session).cloned().collect()
    }

    /// Clear event history
    pub fn clear_events(&self) {
        let mut events = self.events.lock().unwrap();
        events.clear();
    }

    /// Get event statistics
    pub fn get_event_statistics(&self) -> EventStatistics {
        let events = self.events.lock().unwrap();
        let mut stats = EventStatistics::default();

        for event in events.iter() {
            match event.event_type {
                SessionEventType::TrackStarted => stats.tracks_started += 1,
                SessionEventType::Advance => stats.advances += 1,
                SessionEventType::PlaybackError => stats.playback_errors += 1,
                SessionEventType::Disconnected => stats.disconnects += 1,
                SessionEventType::StaleCompletion => stats.stale_completions += 1,
                _ => {}
            }
        }

        stats.total_events = events.len();
        stats
    }
}

/// Statistics about logged events
#[derive(Debug, Clone, Default)]
pub struct EventStatistics {
    pub total_events: usize,
    pub tracks_started: usize,
    pub advances: usize,
    pub playback_errors: usize,
    pub disconnects: usize,
    pub stale_completions: usize,
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: String) -> Self {
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!("Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name, duration.as_millis(), threshold.as_millis());
        } else {
            debug!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}
