use crate::models::{SessionId, VoiceContext};
use clap::Parser;
use std::path::{Path, PathBuf};

pub mod status;
pub use status::StatusDisplay;

/// Console front end for the guild jukebox
#[derive(Debug, Parser)]
#[command(name = "jukebox")]
#[command(about = "Per-guild music queue coordinator driven by chat-style commands")]
#[command(version = "0.1.0")]
pub struct CliApp {
    /// Guild whose session typed commands go to
    #[arg(long, default_value_t = 1)]
    pub guild: u64,

    /// Name reported as the command author
    #[arg(long, default_value = "listener")]
    pub user: String,

    /// Voice channel the author is sitting in
    #[arg(long, default_value = "General")]
    pub voice_channel: String,

    /// Act as an author who is not in any voice channel
    #[arg(long)]
    pub no_voice: bool,

    /// Resolve queries locally instead of running yt-dlp
    #[arg(long)]
    pub offline: bool,

    /// Config file to use instead of ~/.config/guild-jukebox/config.toml
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// A chat command, as typed after the command prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Sing { query: String },
    Add { query: String },
    Skip,
    Stop,
    Queue,
    NowPlaying,
    Ping,
    Help,
}

/// Console-only directives, typed without the command prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleDirective {
    /// Send further commands to another guild
    SwitchGuild(u64),
    /// Toggle whether the author sits in a voice channel
    Voice(bool),
    Sessions,
    Stats,
    /// Show or change saved settings
    Config(ConfigAction),
    Exit,
}

/// Settings changes are written to the config file and apply on next start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    Show,
    Prefix(String),
    Timeout(u64),
    Reset,
}

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Chat(ChatCommand),
    Directive(ConsoleDirective),
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &Path) -> PathBuf {
        let Some(text) = path.to_str() else {
            return path.to_path_buf();
        };
        if let Some(rest) = text.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                return home_dir.join(rest);
            }
        } else if text == "~" {
            if let Some(home_dir) = dirs::home_dir() {
                return home_dir;
            }
        }
        path.to_path_buf()
    }

    pub fn session(&self) -> SessionId {
        SessionId(self.guild)
    }

    /// The author's voice channel, unless `--no-voice` was given
    pub fn voice_context(&self) -> Option<VoiceContext> {
        if self.no_voice {
            None
        } else {
            Some(VoiceContext::new(self.guild, self.voice_channel.clone(), self.user.clone()))
        }
    }

    /// Parse a chat message. The prefix must lead the message; everything
    /// after the command word is the query.
    pub fn parse_chat_line(input: &str, prefix: &str) -> Result<ChatCommand, ParseError> {
        let trimmed = input.trim();
        let Some(body) = trimmed.strip_prefix(prefix) else {
            return Err(ParseError::NotACommand);
        };

        let body = body.trim_start();
        let (word, rest) = match body.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (body, ""),
        };
        if word.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        match word.to_lowercase().as_str() {
            "sing" | "play" => Ok(ChatCommand::Sing { query: rest.to_string() }),
            "add" => Ok(ChatCommand::Add { query: rest.to_string() }),
            "skip" => Ok(ChatCommand::Skip),
            "stop" => Ok(ChatCommand::Stop),
            "queue" => Ok(ChatCommand::Queue),
            "nowplaying" | "np" => Ok(ChatCommand::NowPlaying),
            "ping" => Ok(ChatCommand::Ping),
            "help" => Ok(ChatCommand::Help),
            _ => Err(ParseError::UnknownCommand {
                command: word.to_string(),
            }),
        }
    }

    /// Parse one console line: a directive, or a prefixed chat command
    pub fn parse_console_line(input: &str, prefix: &str) -> Result<ConsoleInput, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        if args.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        match args[0] {
            "exit" | "quit" => Ok(ConsoleInput::Directive(ConsoleDirective::Exit)),
            "sessions" => Ok(ConsoleInput::Directive(ConsoleDirective::Sessions)),
            "stats" => Ok(ConsoleInput::Directive(ConsoleDirective::Stats)),
            "guild" => match args.get(1) {
                Some(value) => value
                    .parse::<u64>()
                    .map(|id| ConsoleInput::Directive(ConsoleDirective::SwitchGuild(id)))
                    .map_err(|_| ParseError::InvalidArgument {
                        argument: "guild id".to_string(),
                        value: value.to_string(),
                        expected: "a number".to_string(),
                    }),
                None => Err(ParseError::MissingArgument {
                    command: "guild".to_string(),
                    argument: "id".to_string(),
                }),
            },
            "voice" => match args.get(1).copied() {
                Some("on") => Ok(ConsoleInput::Directive(ConsoleDirective::Voice(true))),
                Some("off") => Ok(ConsoleInput::Directive(ConsoleDirective::Voice(false))),
                Some(other) => Err(ParseError::InvalidArgument {
                    argument: "voice".to_string(),
                    value: other.to_string(),
                    expected: "on or off".to_string(),
                }),
                None => Err(ParseError::MissingArgument {
                    command: "voice".to_string(),
                    argument: "on|off".to_string(),
                }),
            },
            "config" => Self::parse_config_action(&args[1..])
                .map(|action| ConsoleInput::Directive(ConsoleDirective::Config(action))),
            _ => Self::parse_chat_line(input, prefix).map(ConsoleInput::Chat),
        }
    }

    fn parse_config_action(args: &[&str]) -> Result<ConfigAction, ParseError> {
        match args {
            [] | ["show"] => Ok(ConfigAction::Show),
            ["reset"] => Ok(ConfigAction::Reset),
            ["prefix", value] => Ok(ConfigAction::Prefix(value.to_string())),
            ["timeout", value] => value
                .parse::<u64>()
                .map(ConfigAction::Timeout)
                .map_err(|_| ParseError::InvalidArgument {
                    argument: "timeout".to_string(),
                    value: value.to_string(),
                    expected: "seconds".to_string(),
                }),
            [setting @ ("prefix" | "timeout")] => Err(ParseError::MissingArgument {
                command: format!("config {}", setting),
                argument: "value".to_string(),
            }),
            [other, ..] => Err(ParseError::InvalidArgument {
                argument: "config".to_string(),
                value: other.to_string(),
                expected: "show, prefix, timeout or reset".to_string(),
            }),
        }
    }

    /// Display console help
    pub fn display_help(prefix: &str) {
        println!("Guild Jukebox - type chat commands as you would in a text channel.");
        println!();
        println!("{}", StatusDisplay::help_text(prefix));
        println!();
        println!("Console:");
        println!("  guild <id>      - Send further commands to another guild");
        println!("  voice on|off    - Join or leave your voice channel as the author");
        println!("  sessions        - List active sessions");
        println!("  stats           - Show session event statistics");
        println!("  config [show]   - Show saved settings");
        println!("  config prefix <p> | timeout <secs> | reset");
        println!("                  - Change saved settings (applied on next start)");
        println!("  exit, quit      - Leave the jukebox");
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Not a command")]
    NotACommand,

    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },
}
