//! Playback coordinator: the per-session state machine that owns every
//! decision about what plays next.
//!
//! All entry points for one session are serialized through the session token.
//! Output completion callbacks never touch state directly. They push a
//! [`Completion`] onto a channel; a dispatcher task picks it up and runs the
//! advance decision inside the serialization region. Every play request carries
//! a ticket, and a completion whose ticket is no longer active is ignored, which
//! is how a stop or a late duplicate callback stays harmless.

use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::JukeboxConfig;
use crate::error::JukeboxError;
use crate::logging::JukeboxLogger;
use crate::models::{AdvanceCause, CommandOutcome, QueueSnapshot, SessionId, TrackDescriptor, VoiceContext};
use crate::notifier::Notifier;
use crate::output::{AudioOutput, CompletionCallback, PlaybackFailure};
use crate::session::{SessionGuard, SessionStore};

/// What an advance decision ended with
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceResult {
    Started(TrackDescriptor),
    /// Queue empty; the session went idle
    Drained,
}

/// Completion report travelling from the output layer to the dispatcher
#[derive(Debug)]
struct Completion {
    session: SessionId,
    ticket: u64,
    failure: Option<PlaybackFailure>,
}

/// Message shown shortly after a track starts
pub fn now_playing_message(track: &TrackDescriptor) -> String {
    match track.duration_display() {
        Some(duration) => format!("Now playing - {} [{}]", track, duration),
        None => format!("Now playing - {}", track),
    }
}

/// Cloneable handle to the coordinator. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: SessionStore,
    output: Arc<dyn AudioOutput>,
    notifier: Arc<dyn Notifier>,
    logger: JukeboxLogger,
    config: JukeboxConfig,
    completions: mpsc::UnboundedSender<Completion>,
}

impl PlaybackCoordinator {
    pub fn new(
        config: JukeboxConfig,
        output: Arc<dyn AudioOutput>,
        notifier: Arc<dyn Notifier>,
        logger: JukeboxLogger,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            store: SessionStore::new(),
            output,
            notifier,
            logger,
            config,
            completions: tx,
        });
        tokio::spawn(dispatch_completions(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    pub fn logger(&self) -> &JukeboxLogger {
        &self.inner.logger
    }

    pub fn session_count(&self) -> usize {
        self.inner.store.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.store.ids()
    }

    /// Append a resolved track and start playback if the session is idle.
    ///
    /// `voice` replaces the remembered voice context when given.
    pub async fn enqueue(
        &self,
        session: SessionId,
        track: TrackDescriptor,
        voice: Option<VoiceContext>,
    ) -> CommandOutcome {
        let handle = self.inner.store.get_or_create(session);
        let mut guard = handle.serialize().await;

        let (active, position) = guard.with_state(|state| {
            if let Some(voice) = voice {
                state.voice_context = Some(voice);
            }
            state.queue.push_back(track.clone());
            (state.is_playing, state.queue.len())
        });

        if active {
            self.inner.logger.log_track_queued(session, &track.to_string(), position);
            return CommandOutcome::Queued { track, position };
        }

        match self.inner.advance_locked(&mut guard, AdvanceCause::Normal).await {
            Ok(AdvanceResult::Started(started)) => CommandOutcome::Started(started),
            Ok(AdvanceResult::Drained) => CommandOutcome::Failed(JukeboxError::PlaybackError(
                "no queued track could be started".to_string(),
            )),
            Err(err) => {
                // Leave the queue as it was before this request.
                guard.with_state(|state| {
                    if let Some(pos) = state.queue.iter().rposition(|t| t == &track) {
                        state.queue.remove(pos);
                    }
                });
                CommandOutcome::Failed(err)
            }
        }
    }

    /// Run the advance decision now. A play request still in flight is retired
    /// and its output stopped first, so its completion becomes a no-op.
    pub async fn advance(
        &self,
        session: SessionId,
        cause: AdvanceCause,
    ) -> Result<AdvanceResult, JukeboxError> {
        let handle = self.inner.store.get_or_create(session);
        let mut guard = handle.serialize().await;

        let retired = guard.with_state(|state| state.active_ticket.take());
        if let Some(ticket) = retired {
            debug!("[{}] retiring ticket {} before forced advance", session, ticket);
            self.inner.output.stop(session);
        }
        self.inner.advance_locked(&mut guard, cause).await
    }

    /// Ask the output to stop the current track. The resulting completion
    /// advances with cause [`AdvanceCause::SkipRequested`].
    pub async fn skip(&self, session: SessionId) -> CommandOutcome {
        let Some(handle) = self.inner.store.get(session) else {
            return CommandOutcome::Rejected("Nothing is playing right now.".to_string());
        };
        let mut guard = handle.serialize().await;

        let current = guard.with_state(|state| {
            if !state.is_playing {
                return None;
            }
            state.skip_requested = true;
            state.cancel_announcement();
            Some(state.now_playing.as_ref().map(|t| t.to_string()))
        });

        match current {
            Some(title) => {
                self.inner.logger.log_skip_requested(session, title.as_deref());
                self.inner.output.stop(session);
                CommandOutcome::Acknowledged("Skipping current song...".to_string())
            }
            None => CommandOutcome::Rejected("Nothing is playing right now.".to_string()),
        }
    }

    /// Clear everything, stop the output and leave the voice channel
    pub async fn stop(&self, session: SessionId) -> CommandOutcome {
        let handle = self.inner.store.get_or_create(session);
        let mut guard = handle.serialize().await;

        let dropped = guard.with_state(|state| {
            let dropped = state.queue.len();
            state.queue.clear();
            state.now_playing = None;
            state.is_playing = false;
            state.skip_requested = false;
            state.active_ticket = None;
            state.cancel_announcement();
            dropped
        });
        self.inner.logger.log_stopped(session, dropped);

        if !self.inner.output.is_connected(session) {
            return CommandOutcome::Rejected("Not connected to a voice channel.".to_string());
        }

        self.inner.output.stop(session);
        tokio::time::sleep(self.inner.config.stop_delay()).await;
        self.inner.disconnect(session).await;
        CommandOutcome::Acknowledged("Music stopped. Disconnecting...".to_string())
    }

    /// Snapshot for display. Does not wait on in-flight decisions.
    pub fn inspect(&self, session: SessionId) -> QueueSnapshot {
        self.inner
            .store
            .get(session)
            .map(|handle| handle.snapshot())
            .unwrap_or_default()
    }

    /// Forget idle sessions whose output is no longer connected
    pub fn prune_idle_sessions(&self) -> usize {
        let output = &self.inner.output;
        let pruned = self.inner.store.prune_idle(|id| !output.is_connected(id));
        if pruned > 0 {
            debug!("Pruned {} idle session(s)", pruned);
        }
        pruned
    }
}

async fn dispatch_completions(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Completion>) {
    while let Some(completion) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            inner.handle_completion(completion).await;
        });
    }
    debug!("Completion dispatcher stopped");
}

impl Inner {
    fn completion_callback(&self, session: SessionId, ticket: u64) -> CompletionCallback {
        let completions = self.completions.clone();
        Box::new(move |failure| {
            if completions.send(Completion { session, ticket, failure }).is_err() {
                debug!("[{}] completion for ticket {} dropped, coordinator gone", session, ticket);
            }
        })
    }

    async fn handle_completion(&self, completion: Completion) {
        let Completion { session, ticket, failure } = completion;
        let Some(handle) = self.store.get(session) else {
            self.logger.log_stale_completion(session, ticket);
            return;
        };
        let mut guard = handle.serialize().await;

        if guard.with_state(|state| state.active_ticket) != Some(ticket) {
            self.logger.log_stale_completion(session, ticket);
            return;
        }

        let cause = match failure {
            Some(PlaybackFailure(reason)) => AdvanceCause::Error(reason),
            None => AdvanceCause::Normal,
        };
        if let Err(err) = self.advance_locked(&mut guard, cause).await {
            warn!("[{}] advance after completion failed: {}", session, err);
            self.notify(session, &err.user_message()).await;
        }
    }

    /// The advance decision. Caller holds the session token.
    async fn advance_locked(
        &self,
        guard: &mut SessionGuard<'_>,
        cause: AdvanceCause,
    ) -> Result<AdvanceResult, JukeboxError> {
        let session = guard.id();
        let (cause, remaining) = guard.with_state(|state| {
            state.is_playing = false;
            state.active_ticket = None;
            state.cancel_announcement();
            let cause = if state.skip_requested {
                AdvanceCause::SkipRequested
            } else {
                cause
            };
            state.skip_requested = false;
            (cause, state.queue.len())
        });
        self.logger.log_advance(session, &cause, remaining);

        if let AdvanceCause::Error(reason) = &cause {
            self.logger.log_playback_error(session, reason);
            let message = JukeboxError::PlaybackError(reason.clone()).user_message();
            self.notify(session, &message).await;
        }

        loop {
            let next = guard.with_state(|state| {
                let next = state.queue.pop_front();
                state.now_playing = next.clone();
                state.is_playing = next.is_some();
                next
            });
            let Some(track) = next else {
                return self.drain(guard).await;
            };

            if let Err(err) = self.ensure_connected(guard).await {
                guard.with_state(|state| {
                    state.queue.push_front(track);
                    state.now_playing = None;
                    state.is_playing = false;
                });
                return Err(err);
            }

            let ticket = guard.issue_ticket();
            guard.with_state(|state| state.active_ticket = Some(ticket));
            let callback = self.completion_callback(session, ticket);

            match self.output.play(session, track.stream(), callback) {
                Ok(()) => {
                    self.logger.log_track_started(session, &track.to_string(), ticket);
                    self.schedule_announcement(guard, &track);
                    return Ok(AdvanceResult::Started(track));
                }
                Err(err) => {
                    guard.with_state(|state| {
                        state.active_ticket = None;
                        state.now_playing = None;
                        state.is_playing = false;
                    });
                    self.logger.log_playback_error(session, &err.to_string());
                    self.notify(session, &format!("Error starting playback: {}", err)).await;
                }
            }
        }
    }

    async fn drain(&self, guard: &mut SessionGuard<'_>) -> Result<AdvanceResult, JukeboxError> {
        let session = guard.id();
        guard.with_state(|state| {
            state.now_playing = None;
            state.is_playing = false;
            state.active_ticket = None;
        });
        self.logger.log_queue_finished(session);

        if self.output.is_connected(session) {
            self.notify(session, "Queue finished. Disconnecting...").await;
            tokio::time::sleep(self.config.disconnect_delay()).await;
            self.disconnect(session).await;
        }
        Ok(AdvanceResult::Drained)
    }

    async fn ensure_connected(&self, guard: &mut SessionGuard<'_>) -> Result<(), JukeboxError> {
        let session = guard.id();
        if self.output.is_connected(session) {
            return Ok(());
        }

        let voice = guard.with_state(|state| state.voice_context.clone());
        let Some(voice) = voice else {
            self.logger.log_connection_failed(session, "no voice context");
            return Err(JukeboxError::ConnectionUnavailable(
                "Voice channel no longer available.".to_string(),
            ));
        };

        info!("[{}] reconnecting to '{}'", session, voice.channel_name);
        match self.output.connect(session, &voice).await {
            Ok(()) => {
                tokio::time::sleep(self.config.reconnect_settle()).await;
                Ok(())
            }
            Err(err) => {
                let reason = match err {
                    JukeboxError::ConnectionUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                self.logger.log_connection_failed(session, &reason);
                Err(JukeboxError::ConnectionUnavailable(reason))
            }
        }
    }

    fn schedule_announcement(&self, guard: &mut SessionGuard<'_>, track: &TrackDescriptor) {
        let session = guard.id();
        let notifier = self.notifier.clone();
        let logger = self.logger.clone();
        let delay = self.config.announce_delay();
        let text = now_playing_message(track);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = notifier.send(session, &text).await {
                logger.log_notify_failed(session, &err.to_string());
            }
        });

        guard.with_state(|state| {
            state.cancel_announcement();
            state.announcement = Some(task.abort_handle());
        });
    }

    async fn disconnect(&self, session: SessionId) {
        match self.output.disconnect(session).await {
            Ok(()) => self.logger.log_disconnected(session, None),
            Err(err) => self.logger.log_disconnected(session, Some(&err.to_string())),
        }
    }

    async fn notify(&self, session: SessionId, text: &str) {
        if let Err(err) = self.notifier.send(session, text).await {
            self.logger.log_notify_failed(session, &err.to_string());
        }
    }
}
