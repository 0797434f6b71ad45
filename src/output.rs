use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use crate::error::JukeboxError;
use crate::models::{SessionId, StreamHandle, VoiceContext};

/// Mid-stream failure reported by the output layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PlaybackFailure(pub String);

/// Invoked exactly once when a play request ends, possibly from another thread
pub type CompletionCallback = Box<dyn FnOnce(Option<PlaybackFailure>) + Send + 'static>;

/// Per-session voice output
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Join the voice channel described by `voice`
    async fn connect(&self, session: SessionId, voice: &VoiceContext) -> Result<(), JukeboxError>;

    /// Leave the voice channel
    async fn disconnect(&self, session: SessionId) -> Result<(), JukeboxError>;

    fn is_connected(&self, session: SessionId) -> bool;

    fn is_playing(&self, session: SessionId) -> bool;

    /// Begin streaming. `on_complete` fires when playback ends for any reason.
    fn play(
        &self,
        session: SessionId,
        stream: &StreamHandle,
        on_complete: CompletionCallback,
    ) -> Result<(), JukeboxError>;

    /// Stop the current stream, if any. Idempotent; fires the bound callback.
    fn stop(&self, session: SessionId);
}

struct Playback {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

#[derive(Default)]
struct VoiceChannel {
    voice: Option<VoiceContext>,
    playback: Option<Playback>,
}

/// Output that "plays" each stream for a fixed length on a worker thread.
///
/// Used by the console binary in place of a real voice transport. Completion
/// callbacks fire from the worker thread, like a real encoder would.
pub struct SimulatedOutput {
    track_length: Duration,
    channels: Mutex<HashMap<SessionId, VoiceChannel>>,
}

impl SimulatedOutput {
    pub fn new(track_length: Duration) -> Self {
        Self {
            track_length,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn spawn_worker(
        &self,
        session: SessionId,
        location: String,
        stop: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
        on_complete: CompletionCallback,
    ) -> std::io::Result<()> {
        let length = self.track_length;
        thread::Builder::new()
            .name(format!("playback-{}", session.0))
            .spawn(move || {
                let tick = Duration::from_millis(50);
                let mut elapsed = Duration::ZERO;
                while elapsed < length && !stop.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    elapsed += tick;
                }
                debug!("[{}] stream {} ended after {:?}", session, location, elapsed);
                finished.store(true, Ordering::Release);
                on_complete(None);
            })
            .map(|_| ())
    }
}

#[async_trait]
impl AudioOutput for SimulatedOutput {
    async fn connect(&self, session: SessionId, voice: &VoiceContext) -> Result<(), JukeboxError> {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.entry(session).or_default();
        channel.voice = Some(voice.clone());
        info!("[{}] joined voice channel '{}'", session, voice.channel_name);
        Ok(())
    }

    async fn disconnect(&self, session: SessionId) -> Result<(), JukeboxError> {
        let removed = self.channels.lock().unwrap().remove(&session);
        match removed {
            Some(channel) => {
                if let Some(playback) = channel.playback {
                    playback.stop.store(true, Ordering::Release);
                }
                info!("[{}] left voice channel", session);
                Ok(())
            }
            None => Err(JukeboxError::ConnectionUnavailable("Not connected to a voice channel.".to_string())),
        }
    }

    fn is_connected(&self, session: SessionId) -> bool {
        self.channels
            .lock()
            .unwrap()
            .get(&session)
            .map_or(false, |c| c.voice.is_some())
    }

    fn is_playing(&self, session: SessionId) -> bool {
        self.channels
            .lock()
            .unwrap()
            .get(&session)
            .and_then(|c| c.playback.as_ref())
            .map_or(false, |p| !p.finished.load(Ordering::Acquire))
    }

    fn play(
        &self,
        session: SessionId,
        stream: &StreamHandle,
        on_complete: CompletionCallback,
    ) -> Result<(), JukeboxError> {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .get_mut(&session)
            .filter(|c| c.voice.is_some())
            .ok_or_else(|| JukeboxError::ConnectionUnavailable("Not connected to voice.".to_string()))?;

        // A stopped stream may still be winding down on its worker; it can be replaced.
        if let Some(current) = &channel.playback {
            if !current.stop.load(Ordering::Acquire) && !current.finished.load(Ordering::Acquire) {
                return Err(JukeboxError::PlaybackError("Already playing audio.".to_string()));
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        self.spawn_worker(
            session,
            stream.location().to_string(),
            stop.clone(),
            finished.clone(),
            on_complete,
        )
        .map_err(|e| JukeboxError::PlaybackError(format!("could not start worker: {}", e)))?;

        channel.playback = Some(Playback { stop, finished });
        Ok(())
    }

    fn stop(&self, session: SessionId) {
        let channels = self.channels.lock().unwrap();
        if let Some(playback) = channels.get(&session).and_then(|c| c.playback.as_ref()) {
            playback.stop.store(true, Ordering::Release);
        }
    }
}
