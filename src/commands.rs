use std::sync::Arc;
use std::time::Instant;

use log::{debug, log};

use crate::cli::{ChatCommand, StatusDisplay};
use crate::config::JukeboxConfig;
use crate::coordinator::PlaybackCoordinator;
use crate::error::JukeboxError;
use crate::models::{CommandOutcome, SessionId, VoiceContext};
use crate::notifier::Notifier;
use crate::output::AudioOutput;
use crate::resolver::{resolve_track, Resolver};

/// Who sent a command, and from where
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub session: SessionId,
    pub user: String,
    /// The sender's current voice channel, if any
    pub voice: Option<VoiceContext>,
    pub received_at: Instant,
}

impl CommandContext {
    pub fn new(session: SessionId, user: impl Into<String>, voice: Option<VoiceContext>) -> Self {
        Self {
            session,
            user: user.into(),
            voice,
            received_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnqueueStyle {
    /// `sing`: says nothing extra when playback starts right away
    Sing,
    /// `add`: always confirms the addition
    Add,
}

pub struct CommandHandler {
    coordinator: PlaybackCoordinator,
    resolver: Arc<dyn Resolver>,
    output: Arc<dyn AudioOutput>,
    notifier: Arc<dyn Notifier>,
    config: JukeboxConfig,
}

impl CommandHandler {
    pub fn new(
        coordinator: PlaybackCoordinator,
        resolver: Arc<dyn Resolver>,
        output: Arc<dyn AudioOutput>,
        notifier: Arc<dyn Notifier>,
        config: JukeboxConfig,
    ) -> Self {
        Self {
            coordinator,
            resolver,
            output,
            notifier,
            config,
        }
    }

    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.coordinator
    }

    pub async fn handle(&self, ctx: &CommandContext, command: ChatCommand) -> CommandOutcome {
        debug!("[{}] {} issued {:?}", ctx.session, ctx.user, command);
        match command {
            ChatCommand::Sing { query } => self.enqueue(ctx, &query, EnqueueStyle::Sing).await,
            ChatCommand::Add { query } => self.enqueue(ctx, &query, EnqueueStyle::Add).await,
            ChatCommand::Skip => self.skip(ctx).await,
            ChatCommand::Stop => self.stop(ctx).await,
            ChatCommand::Queue => self.queue(ctx).await,
            ChatCommand::NowPlaying => self.now_playing(ctx).await,
            ChatCommand::Ping => self.ping(ctx).await,
            ChatCommand::Help => {
                let text = StatusDisplay::help_text(&self.config.command_prefix);
                self.reply(ctx, &text).await;
                CommandOutcome::Acknowledged(text)
            }
        }
    }

    async fn enqueue(&self, ctx: &CommandContext, query: &str, style: EnqueueStyle) -> CommandOutcome {
        let command = match style {
            EnqueueStyle::Sing => "sing",
            EnqueueStyle::Add => "add",
        };
        if query.trim().is_empty() {
            let text = format!(
                "Please provide a song name after {}{}",
                self.config.command_prefix, command
            );
            self.reply(ctx, &text).await;
            return CommandOutcome::Rejected(text);
        }

        let Some(voice) = ctx.voice.clone() else {
            let text = "You need to be in a voice channel to use this command.".to_string();
            self.reply(ctx, &text).await;
            return CommandOutcome::Rejected(text);
        };

        if !self.output.is_connected(ctx.session) {
            if let Err(err) = self.output.connect(ctx.session, &voice).await {
                let err = match err {
                    JukeboxError::ConnectionUnavailable(_) => err,
                    other => JukeboxError::ConnectionUnavailable(other.to_string()),
                };
                return self.fail(ctx, err).await;
            }
            tokio::time::sleep(self.config.reconnect_settle()).await;
        }

        self.reply(ctx, "Searching for your song...").await;
        let track = match resolve_track(self.resolver.as_ref(), query, self.config.resolve_timeout()).await {
            Ok(track) => track,
            Err(err) => return self.fail(ctx, err).await,
        };

        let outcome = self.coordinator.enqueue(ctx.session, track, Some(voice)).await;
        match (&outcome, style) {
            (CommandOutcome::Queued { track, .. }, _) | (CommandOutcome::Started(track), EnqueueStyle::Add) => {
                self.reply(ctx, &format!("Added to queue: {}", track)).await;
            }
            (CommandOutcome::Failed(err), _) => {
                self.log_failure(ctx, err);
                self.reply(ctx, &err.user_message()).await;
            }
            _ => {}
        }
        outcome
    }

    async fn skip(&self, ctx: &CommandContext) -> CommandOutcome {
        let outcome = self.coordinator.skip(ctx.session).await;
        self.reply_outcome(ctx, &outcome).await;
        outcome
    }

    async fn stop(&self, ctx: &CommandContext) -> CommandOutcome {
        let outcome = self.coordinator.stop(ctx.session).await;
        self.reply_outcome(ctx, &outcome).await;
        outcome
    }

    async fn queue(&self, ctx: &CommandContext) -> CommandOutcome {
        let snapshot = self.coordinator.inspect(ctx.session);
        let text = StatusDisplay::queue_listing(&snapshot);
        self.reply(ctx, &text).await;
        CommandOutcome::Acknowledged(text)
    }

    async fn now_playing(&self, ctx: &CommandContext) -> CommandOutcome {
        let snapshot = self.coordinator.inspect(ctx.session);
        let text = StatusDisplay::now_playing_line(&snapshot);
        self.reply(ctx, &text).await;
        CommandOutcome::Acknowledged(text)
    }

    async fn ping(&self, ctx: &CommandContext) -> CommandOutcome {
        let latency = ctx.received_at.elapsed().as_millis();
        let text = format!("Pong! Bot latency: {}ms", latency);
        self.reply(ctx, &text).await;
        CommandOutcome::Acknowledged(text)
    }

    async fn fail(&self, ctx: &CommandContext, err: JukeboxError) -> CommandOutcome {
        self.log_failure(ctx, &err);
        self.reply(ctx, &err.user_message()).await;
        CommandOutcome::Failed(err)
    }

    fn log_failure(&self, ctx: &CommandContext, err: &JukeboxError) {
        log!(err.severity().log_level(), "[{}] command from {} failed: {}", ctx.session, ctx.user, err);
    }

    async fn reply_outcome(&self, ctx: &CommandContext, outcome: &CommandOutcome) {
        match outcome {
            CommandOutcome::Acknowledged(text) | CommandOutcome::Rejected(text) => self.reply(ctx, text).await,
            CommandOutcome::Failed(err) => self.reply(ctx, &err.user_message()).await,
            CommandOutcome::Started(_) | CommandOutcome::Queued { .. } => {}
        }
    }

    async fn reply(&self, ctx: &CommandContext, text: &str) {
        if let Err(err) = self.notifier.send(ctx.session, text).await {
            self.coordinator.logger().log_notify_failed(ctx.session, &err.to_string());
        }
    }
}
