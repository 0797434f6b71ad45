use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::AbortHandle;

use crate::models::{QueueSnapshot, SessionId, TrackDescriptor, VoiceContext};

/// Mutable state of one session
#[derive(Debug, Default)]
pub struct SessionState {
    pub queue: VecDeque<TrackDescriptor>,
    pub now_playing: Option<TrackDescriptor>,
    pub is_playing: bool,
    pub skip_requested: bool,
    /// Ticket of the play request whose completion is still expected
    pub active_ticket: Option<u64>,
    /// Last known voice channel, used for reconnects
    pub voice_context: Option<VoiceContext>,
    /// Deferred "now playing" message, if one is pending
    pub announcement: Option<AbortHandle>,
}

impl SessionState {
    /// Cancel the pending announcement. Best-effort: it may already be sent.
    pub fn cancel_announcement(&mut self) {
        if let Some(handle) = self.announcement.take() {
            handle.abort();
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.now_playing.is_none() && !self.is_playing
    }
}

/// One voice channel's playback context
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    token: AsyncMutex<()>,
    state: Mutex<SessionState>,
    next_ticket: AtomicU64,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            token: AsyncMutex::new(()),
            state: Mutex::new(SessionState::default()),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Enter the session's serialization region
    pub async fn serialize(&self) -> SessionGuard<'_> {
        let token = self.token.lock().await;
        SessionGuard {
            session: self,
            _token: token,
        }
    }

    /// Read-only view. Does not wait for the serialization token.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().unwrap();
        QueueSnapshot {
            now_playing: state.now_playing.clone(),
            is_playing: state.is_playing,
            queue: state.queue.iter().cloned().collect(),
        }
    }

    fn is_prunable(&self) -> bool {
        // A held token means a decision is in flight.
        let Ok(_token) = self.token.try_lock() else {
            return false;
        };
        let state = self.state.lock().unwrap();
        state.is_idle() && state.announcement.as_ref().map_or(true, |h| h.is_finished())
    }
}

/// Proof of holding a session's serialization token. Session state is only
/// mutated through a guard; display reads use [`Session::snapshot`] instead.
pub struct SessionGuard<'a> {
    session: &'a Session,
    _token: AsyncMutexGuard<'a, ()>,
}

impl SessionGuard<'_> {
    pub fn id(&self) -> SessionId {
        self.session.id
    }

    /// Run `f` against the session state. Never hold the state across an await.
    pub fn with_state<R>(&mut self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.session.state.lock().unwrap();
        f(&mut state)
    }

    /// Allocate the next playback ticket. Tickets only ever increase.
    pub fn issue_ticket(&mut self) -> u64 {
        self.session.next_ticket.fetch_add(1, Ordering::Relaxed)
    }
}

/// Mapping from session id to session, created lazily
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session, creating it on first use. Idempotent under races.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Session::new(id)))
            .clone()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Ids of all tracked sessions, sorted
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop idle sessions nobody else holds and for which `released` reports
    /// no remaining output connection. Returns how many were pruned.
    pub fn prune_idle<F>(&self, released: F) -> usize
    where
        F: Fn(SessionId) -> bool,
    {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let unshared = Arc::strong_count(session) == 1;
            !(unshared && session.is_prunable() && released(*id))
        });
        before - sessions.len()
    }
}
