use std::path::Path;

use crate::config::JukeboxConfig;
use crate::error::{ErrorSeverity, JukeboxError};
use crate::logging::EventStatistics;
use crate::models::{QueueSnapshot, SessionId};

/// Formats chat replies and console output
pub struct StatusDisplay;

impl StatusDisplay {
    /// Reply for the `queue` command
    pub fn queue_listing(snapshot: &QueueSnapshot) -> String {
        let current = snapshot
            .current()
            .map(|track| format!("**Now Playing:** {}\n\n", track))
            .unwrap_or_default();

        if snapshot.queue.is_empty() {
            return if current.is_empty() {
                "The queue is empty.".to_string()
            } else {
                format!("{}**Queue is empty.**", current)
            };
        }

        let listing = snapshot
            .queue
            .iter()
            .enumerate()
            .map(|(i, track)| format!("{}. {}", i + 1, track))
            .collect::<Vec<_>>()
            .join("\n");

        format!("{}**Current queue:**\n{}", current, listing)
    }

    /// Reply for the `nowplaying` command
    pub fn now_playing_line(snapshot: &QueueSnapshot) -> String {
        match snapshot.current() {
            Some(track) => match track.duration_display() {
                Some(duration) => format!("**Now Playing:** {} [{}]", track, duration),
                None => format!("**Now Playing:** {}", track),
            },
            None => "Nothing is playing right now.".to_string(),
        }
    }

    /// Reply for the `help` command
    pub fn help_text(prefix: &str) -> String {
        let commands = [
            ("sing <song>", "Search for a song and play it, or queue it if something is playing"),
            ("add <song>", "Search for a song and add it to the queue"),
            ("skip", "Skip the current song"),
            ("stop", "Stop playback, clear the queue and leave the voice channel"),
            ("queue", "Show the current queue"),
            ("nowplaying", "Show the song that is playing (alias: np)"),
            ("ping", "Check if the bot is responsive"),
            ("help", "Show this message"),
        ];

        let mut text = String::from("**Music commands:**");
        for (usage, description) in commands {
            text.push_str(&format!("\n{}{} - {}", prefix, usage, description));
        }
        text
    }

    /// One-line console summary of a session
    pub fn session_summary(session: SessionId, snapshot: &QueueSnapshot) -> String {
        let current = snapshot
            .current()
            .map(|track| Self::truncate(&track.to_string(), 50))
            .unwrap_or_else(|| "idle".to_string());
        format!("{} | {} | {} queued", session, current, snapshot.queue.len())
    }

    /// Saved settings, as shown by the `config` directive
    pub fn config_summary(config: &JukeboxConfig, path: &Path) -> String {
        let track_length = config
            .simulated_track_secs
            .map(|secs| format!("{}s", secs))
            .unwrap_or_else(|| "default".to_string());
        [
            format!("Config file: {}", path.display()),
            format!("  command prefix:   {}", config.command_prefix),
            format!("  search prefix:    {}", config.search_prefix),
            format!("  resolve timeout:  {}s", config.resolve_timeout_secs),
            format!("  yt-dlp:           {}", config.ytdlp_path),
            format!("  track length:     {}", track_length),
        ]
        .join("\n")
    }

    pub fn display_statistics(stats: &EventStatistics) {
        println!("┌─ Session Events ───────────────────────────────────────┐");
        println!("│ Total events: {}", stats.total_events);
        println!("│ Tracks started: {}", stats.tracks_started);
        println!("│ Advances: {}", stats.advances);
        println!("│ Playback errors: {}", stats.playback_errors);
        println!("│ Disconnects: {}", stats.disconnects);
        println!("│ Stale completions: {}", stats.stale_completions);
        println!("└────────────────────────────────────────────────────────┘");
    }

    /// Display error message with formatting
    pub fn display_error(error: &JukeboxError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!("┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon, severity.as_str());

        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    /// Word-wrap text to the given width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + 1 + word.chars().count() <= width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(current_line);
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(current_line);
        }

        if lines.is_empty() {
            lines.push(String::new());
        }

        lines
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }
}
