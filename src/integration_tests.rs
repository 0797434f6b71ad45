use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cli::ChatCommand;
use crate::commands::{CommandContext, CommandHandler};
use crate::config::JukeboxConfig;
use crate::coordinator::{AdvanceResult, PlaybackCoordinator};
use crate::error::JukeboxError;
use crate::logging::{JukeboxLogger, SessionEventType};
use crate::models::{
    AdvanceCause, CommandOutcome, RawTrackMetadata, SessionId, StreamHandle, TrackDescriptor,
    VoiceContext,
};
use crate::notifier::{Notifier, NotifyError};
use crate::output::{AudioOutput, CompletionCallback, PlaybackFailure, SimulatedOutput};
use crate::resolver::Resolver;

const GUILD: SessionId = SessionId(100);
const OTHER_GUILD: SessionId = SessionId(200);

#[derive(Default)]
struct OutputState {
    connected: HashSet<SessionId>,
    playing: HashMap<SessionId, CompletionCallback>,
    plays: Vec<(SessionId, String)>,
    overlaps: usize,
    connects: usize,
    disconnects: HashMap<SessionId, usize>,
    refuse_connect: bool,
    refuse_play: HashSet<String>,
    stop_failure: Option<String>,
}

#[derive(Default)]
struct MockOutput {
    state: Mutex<OutputState>,
}

impl MockOutput {
    fn fire(callback: CompletionCallback, failure: Option<PlaybackFailure>) {
        thread::spawn(move || callback(failure));
    }

    /// End the current stream as if it ran out or crashed
    fn finish(&self, session: SessionId, failure: Option<&str>) -> bool {
        let callback = self.state.lock().unwrap().playing.remove(&session);
        match callback {
            Some(callback) => {
                Self::fire(callback, failure.map(|f| PlaybackFailure(f.to_string())));
                true
            }
            None => false,
        }
    }

    fn plays(&self, session: SessionId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .plays
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, location)| location.clone())
            .collect()
    }

    fn overlaps(&self) -> usize {
        self.state.lock().unwrap().overlaps
    }

    fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    fn disconnects(&self, session: SessionId) -> usize {
        self.state.lock().unwrap().disconnects.get(&session).copied().unwrap_or(0)
    }

    /// Simulate the voice connection dropping without a disconnect call
    fn drop_connection(&self, session: SessionId) {
        self.state.lock().unwrap().connected.remove(&session);
    }

    fn refuse_connect(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connect = refuse;
    }

    fn refuse_play(&self, location: &str) {
        self.state.lock().unwrap().refuse_play.insert(location.to_string());
    }

    fn fail_on_stop(&self, reason: &str) {
        self.state.lock().unwrap().stop_failure = Some(reason.to_string());
    }
}

#[async_trait]
impl AudioOutput for MockOutput {
    async fn connect(&self, session: SessionId, _voice: &VoiceContext) -> Result<(), JukeboxError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connect {
            return Err(JukeboxError::ConnectionUnavailable("voice gateway refused".to_string()));
        }
        state.connected.insert(session);
        state.connects += 1;
        Ok(())
    }

    async fn disconnect(&self, session: SessionId) -> Result<(), JukeboxError> {
        let mut state = self.state.lock().unwrap();
        state.connected.remove(&session);
        *state.disconnects.entry(session).or_default() += 1;
        if let Some(callback) = state.playing.remove(&session) {
            Self::fire(callback, None);
        }
        Ok(())
    }

    fn is_connected(&self, session: SessionId) -> bool {
        self.state.lock().unwrap().connected.contains(&session)
    }

    fn is_playing(&self, session: SessionId) -> bool {
        self.state.lock().unwrap().playing.contains_key(&session)
    }

    fn play(
        &self,
        session: SessionId,
        stream: &StreamHandle,
        on_complete: CompletionCallback,
    ) -> Result<(), JukeboxError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected.contains(&session) {
            return Err(JukeboxError::ConnectionUnavailable("Not connected to voice.".to_string()));
        }
        if state.refuse_play.contains(stream.location()) {
            return Err(JukeboxError::PlaybackError("unsupported stream".to_string()));
        }
        if state.playing.contains_key(&session) {
            state.overlaps += 1;
        }
        state.playing.insert(session, on_complete);
        state.plays.push((session, stream.location().to_string()));
        Ok(())
    }

    fn stop(&self, session: SessionId) {
        let mut state = self.state.lock().unwrap();
        let failure = state.stop_failure.clone().map(PlaybackFailure);
        if let Some(callback) = state.playing.remove(&session) {
            Self::fire(callback, failure);
        }
    }
}

#[derive(Default)]
struct MockNotifier {
    messages: Mutex<Vec<(SessionId, String)>>,
    failing: AtomicBool,
}

impl MockNotifier {
    fn messages(&self, session: SessionId) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn saw(&self, session: SessionId, needle: &str) -> bool {
        self.messages(session).iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, session: SessionId, text: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("channel deleted".to_string()));
        }
        self.messages.lock().unwrap().push((session, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct MockResolver {
    missing: HashSet<String>,
}

#[async_trait]
impl Resolver for MockResolver {
    async fn search(&self, query: &str) -> Result<RawTrackMetadata, JukeboxError> {
        if self.missing.contains(query) {
            return Err(JukeboxError::ResolutionFailed("no results".to_string()));
        }
        Ok(RawTrackMetadata {
            entries: Some(vec![RawTrackMetadata {
                title: Some(query.to_string()),
                uploader: Some("Mock Uploader".to_string()),
                duration: Some(60.0),
                is_live: Some(false),
                url: Some(stream_for(query)),
                entries: None,
            }]),
            ..Default::default()
        })
    }
}

struct Harness {
    coordinator: PlaybackCoordinator,
    output: Arc<MockOutput>,
    notifier: Arc<MockNotifier>,
    logger: JukeboxLogger,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(JukeboxConfig::immediate())
    }

    fn with_config(config: JukeboxConfig) -> Self {
        let output = Arc::new(MockOutput::default());
        let notifier = Arc::new(MockNotifier::default());
        let logger = JukeboxLogger::new();
        let coordinator = PlaybackCoordinator::new(
            config,
            output.clone(),
            notifier.clone(),
            logger.clone(),
        );
        Self {
            coordinator,
            output,
            notifier,
            logger,
        }
    }

    fn handler(&self, resolver: MockResolver) -> CommandHandler {
        CommandHandler::new(
            self.coordinator.clone(),
            Arc::new(resolver),
            self.output.clone(),
            self.notifier.clone(),
            JukeboxConfig::immediate(),
        )
    }

    async fn enqueue(&self, session: SessionId, name: &str) -> CommandOutcome {
        self.coordinator.enqueue(session, track(name), Some(voice())).await
    }

    fn count_events(&self, session: SessionId, event_type: SessionEventType) -> usize {
        self.logger
            .events_for(session)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    fn count_advances(&self, session: SessionId, cause: &AdvanceCause) -> usize {
        self.logger
            .events_for(session)
            .iter()
            .filter(|e| e.event_type == SessionEventType::Advance && e.cause.as_ref() == Some(cause))
            .count()
    }
}

fn stream_for(name: &str) -> String {
    format!("stream://{}", name)
}

fn track(name: &str) -> TrackDescriptor {
    TrackDescriptor::new(name, "Uploader", 60, false, StreamHandle::new(stream_for(name)))
}

fn voice() -> VoiceContext {
    VoiceContext::new(1, "General", "tester")
}

fn titles(tracks: &[TrackDescriptor]) -> Vec<&str> {
    tracks.iter().map(|t| t.title()).collect()
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give stray callbacks a chance to land before asserting they changed nothing
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_enqueue_while_idle_starts_first_and_queues_rest() {
    let h = Harness::new();

    match h.enqueue(GUILD, "A").await {
        CommandOutcome::Started(track) => assert_eq!(track.title(), "A"),
        other => panic!("Expected Started, got {:?}", other),
    }
    for (name, expected_position) in [("B", 1), ("C", 2)] {
        match h.enqueue(GUILD, name).await {
            CommandOutcome::Queued { track, position } => {
                assert_eq!(track.title(), name);
                assert_eq!(position, expected_position);
            }
            other => panic!("Expected Queued, got {:?}", other),
        }
    }

    let snapshot = h.coordinator.inspect(GUILD);
    assert_eq!(snapshot.current().map(|t| t.title()), Some("A"));
    assert_eq!(titles(&snapshot.queue), vec!["B", "C"]);
    assert_eq!(h.output.plays(GUILD), vec![stream_for("A")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueues_never_overlap() {
    let h = Arc::new(Harness::new());
    let names: Vec<String> = (0..10).map(|i| format!("Track {}", i)).collect();

    let tasks: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let h = h.clone();
            tokio::spawn(async move { h.enqueue(GUILD, &name).await })
        })
        .collect();

    let mut started = Vec::new();
    let mut queued = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            CommandOutcome::Started(track) => started.push(track),
            CommandOutcome::Queued { track, position } => queued.push((position, track)),
            other => panic!("Unexpected outcome {:?}", other),
        }
    }

    assert_eq!(started.len(), 1);
    assert_eq!(queued.len(), 9);
    queued.sort_by_key(|(position, _)| *position);
    let positions: Vec<usize> = queued.iter().map(|(p, _)| *p).collect();
    assert_eq!(positions, (1..=9).collect::<Vec<_>>());

    // Play the whole queue out; order must follow the reported positions.
    let mut expected = vec![stream_for(started[0].title())];
    expected.extend(queued.iter().map(|(_, t)| stream_for(t.title())));
    for played in 1..=expected.len() {
        wait_until("track to start", || h.output.plays(GUILD).len() == played).await;
        assert!(h.output.finish(GUILD, None));
    }

    wait_until("queue to drain", || h.output.disconnects(GUILD) == 1).await;
    assert_eq!(h.output.plays(GUILD), expected);
    assert_eq!(h.output.overlaps(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_starts_queued_track() {
    let h = Harness::new();

    assert!(h.enqueue(GUILD, "A").await.is_started());
    assert!(h.enqueue(GUILD, "B").await.is_queued());

    assert!(h.output.finish(GUILD, None));
    wait_until("B to start", || h.output.plays(GUILD).len() == 2).await;

    let snapshot = h.coordinator.inspect(GUILD);
    assert_eq!(snapshot.current().map(|t| t.title()), Some("B"));
    assert!(snapshot.queue.is_empty());
    assert_eq!(h.count_advances(GUILD, &AdvanceCause::Normal), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drained_queue_disconnects_exactly_once() {
    let h = Harness::new();

    assert!(h.enqueue(GUILD, "A").await.is_started());
    assert!(h.output.finish(GUILD, None));

    wait_until("disconnect", || h.output.disconnects(GUILD) == 1).await;
    assert!(h.coordinator.inspect(GUILD).is_idle());
    assert!(h.notifier.saw(GUILD, "Queue finished. Disconnecting..."));

    // Nothing left to finish, and nothing else should disconnect.
    assert!(!h.output.finish(GUILD, None));
    settle().await;
    assert_eq!(h.output.disconnects(GUILD), 1);
    assert_eq!(h.count_events(GUILD, SessionEventType::QueueFinished), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_skip_advances_once_without_error_message() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;

    match h.coordinator.skip(GUILD).await {
        CommandOutcome::Acknowledged(text) => assert_eq!(text, "Skipping current song..."),
        other => panic!("Expected Acknowledged, got {:?}", other),
    }

    wait_until("B to start", || h.output.plays(GUILD).len() == 2).await;
    settle().await;
    assert_eq!(h.count_advances(GUILD, &AdvanceCause::SkipRequested), 1);
    assert!(!h.notifier.saw(GUILD, "Error playing song"));
    assert_eq!(h.coordinator.inspect(GUILD).current().map(|t| t.title()), Some("B"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_skip_suppresses_failure_reported_by_stop() {
    let h = Harness::new();
    h.output.fail_on_stop("stream closed by user");

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;
    assert!(matches!(h.coordinator.skip(GUILD).await, CommandOutcome::Acknowledged(_)));

    wait_until("B to start", || h.output.plays(GUILD).len() == 2).await;
    assert_eq!(h.count_advances(GUILD, &AdvanceCause::SkipRequested), 1);
    assert_eq!(h.count_events(GUILD, SessionEventType::PlaybackError), 0);
    assert!(!h.notifier.saw(GUILD, "Error playing song"));
}

#[tokio::test]
async fn test_skip_when_nothing_plays_is_rejected() {
    let h = Harness::new();

    match h.coordinator.skip(GUILD).await {
        CommandOutcome::Rejected(reason) => assert_eq!(reason, "Nothing is playing right now."),
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert_eq!(h.count_events(GUILD, SessionEventType::SkipRequested), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_playback_error_is_reported_and_next_track_plays() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;
    assert!(h.output.finish(GUILD, Some("decoder crashed")));

    wait_until("B to start", || h.output.plays(GUILD).len() == 2).await;
    assert!(h.notifier.saw(GUILD, "Error playing song: decoder crashed. Trying next song..."));
    assert_eq!(
        h.count_advances(GUILD, &AdvanceCause::Error("decoder crashed".to_string())),
        1
    );
    assert_eq!(h.logger.get_event_statistics().playback_errors, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_failure_moves_on_to_next_entry() {
    let h = Harness::new();
    h.output.refuse_play(&stream_for("Broken"));

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "Broken").await;
    h.enqueue(GUILD, "C").await;
    assert!(h.output.finish(GUILD, None));

    wait_until("C to start", || h.output.plays(GUILD).len() == 2).await;
    assert_eq!(h.output.plays(GUILD), vec![stream_for("A"), stream_for("C")]);
    assert!(h.notifier.saw(GUILD, "Error starting playback:"));
    assert_eq!(h.coordinator.inspect(GUILD).current().map(|t| t.title()), Some("C"));
}

#[tokio::test]
async fn test_enqueue_of_unplayable_track_while_idle_fails() {
    let h = Harness::new();
    h.output.refuse_play(&stream_for("Broken"));

    match h.enqueue(GUILD, "Broken").await {
        CommandOutcome::Failed(JukeboxError::PlaybackError(_)) => {}
        other => panic!("Expected Failed(PlaybackError), got {:?}", other),
    }
    assert!(h.coordinator.inspect(GUILD).is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_makes_late_completion_a_no_op() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;

    match h.coordinator.stop(GUILD).await {
        CommandOutcome::Acknowledged(text) => assert_eq!(text, "Music stopped. Disconnecting..."),
        other => panic!("Expected Acknowledged, got {:?}", other),
    }
    assert!(h.coordinator.inspect(GUILD).is_idle());

    wait_until("stale completion", || {
        h.count_events(GUILD, SessionEventType::StaleCompletion) == 1
    })
    .await;
    settle().await;

    assert_eq!(h.output.plays(GUILD), vec![stream_for("A")]);
    assert_eq!(h.output.disconnects(GUILD), 1);
    assert_eq!(h.count_events(GUILD, SessionEventType::QueueFinished), 0);
    assert!(!h.notifier.saw(GUILD, "Queue finished"));
    assert!(h.coordinator.inspect(GUILD).is_idle());
}

#[tokio::test]
async fn test_stop_when_not_connected_still_clears() {
    let h = Harness::new();

    match h.coordinator.stop(GUILD).await {
        CommandOutcome::Rejected(reason) => assert_eq!(reason, "Not connected to a voice channel."),
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert!(h.coordinator.inspect(GUILD).is_idle());
    assert_eq!(h.output.disconnects(GUILD), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_enqueue_after_stop_starts_fresh() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;
    h.coordinator.stop(GUILD).await;

    match h.enqueue(GUILD, "C").await {
        CommandOutcome::Started(track) => assert_eq!(track.title(), "C"),
        other => panic!("Expected Started, got {:?}", other),
    }
    settle().await;
    assert_eq!(h.output.overlaps(), 0);
    assert_eq!(h.coordinator.inspect(GUILD).current().map(|t| t.title()), Some("C"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_advance_reconnects_with_remembered_voice() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;
    assert_eq!(h.output.connects(), 1);

    h.output.drop_connection(GUILD);
    assert!(h.output.finish(GUILD, None));

    wait_until("B to start", || h.output.plays(GUILD).len() == 2).await;
    assert_eq!(h.output.connects(), 2);
}

#[tokio::test]
async fn test_enqueue_without_voice_context_fails_cleanly() {
    let h = Harness::new();

    match h.coordinator.enqueue(GUILD, track("A"), None).await {
        CommandOutcome::Failed(JukeboxError::ConnectionUnavailable(_)) => {}
        other => panic!("Expected ConnectionUnavailable, got {:?}", other),
    }
    assert!(h.coordinator.inspect(GUILD).is_idle());

    h.output.refuse_connect(true);
    match h.enqueue(GUILD, "A").await {
        CommandOutcome::Failed(JukeboxError::ConnectionUnavailable(reason)) => {
            assert_eq!(reason, "voice gateway refused")
        }
        other => panic!("Expected ConnectionUnavailable, got {:?}", other),
    }
    assert!(h.coordinator.inspect(GUILD).is_idle());
    assert_eq!(h.count_events(GUILD, SessionEventType::ConnectionFailed), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lost_connection_keeps_remaining_queue() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;
    h.output.drop_connection(GUILD);
    h.output.refuse_connect(true);
    assert!(h.output.finish(GUILD, None));

    wait_until("failure report", || {
        h.notifier.saw(GUILD, "Could not connect to voice channel: voice gateway refused")
    })
    .await;
    let snapshot = h.coordinator.inspect(GUILD);
    assert!(snapshot.current().is_none());
    assert_eq!(titles(&snapshot.queue), vec!["B"]);

    // The next enqueue picks the leftover track up first.
    h.output.refuse_connect(false);
    match h.enqueue(GUILD, "C").await {
        CommandOutcome::Started(track) => assert_eq!(track.title(), "B"),
        other => panic!("Expected Started(B), got {:?}", other),
    }
    assert_eq!(titles(&h.coordinator.inspect(GUILD).queue), vec!["C"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_advance_retires_in_flight_ticket() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;

    let result = h.coordinator.advance(GUILD, AdvanceCause::Normal).await.unwrap();
    assert_eq!(result, AdvanceResult::Started(track("B")));

    wait_until("stale completion", || {
        h.count_events(GUILD, SessionEventType::StaleCompletion) == 1
    })
    .await;
    settle().await;
    assert_eq!(h.output.plays(GUILD), vec![stream_for("A"), stream_for("B")]);
    assert_eq!(h.output.overlaps(), 0);
    assert_eq!(h.coordinator.inspect(GUILD).current().map(|t| t.title()), Some("B"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_advance_with_simulated_output_keeps_next_track() {
    let output = Arc::new(SimulatedOutput::new(Duration::from_secs(30)));
    let notifier = Arc::new(MockNotifier::default());
    let logger = JukeboxLogger::new();
    let coordinator = PlaybackCoordinator::new(
        JukeboxConfig::immediate(),
        output.clone(),
        notifier.clone(),
        logger.clone(),
    );

    assert!(coordinator.enqueue(GUILD, track("A"), Some(voice())).await.is_started());
    assert!(coordinator.enqueue(GUILD, track("B"), Some(voice())).await.is_queued());

    let result = coordinator.advance(GUILD, AdvanceCause::Normal).await.unwrap();
    assert_eq!(result, AdvanceResult::Started(track("B")));

    let snapshot = coordinator.inspect(GUILD);
    assert!(snapshot.queue.is_empty());
    assert_eq!(snapshot.current().map(|t| t.title()), Some("B"));
    assert!(output.is_playing(GUILD));
    assert!(!notifier.saw(GUILD, "Error starting playback"));
    assert!(!notifier.saw(GUILD, "Queue finished"));

    // A's worker winds down and reports against a retired ticket.
    wait_until("stale completion", || {
        logger
            .events_for(GUILD)
            .iter()
            .any(|e| e.event_type == SessionEventType::StaleCompletion)
    })
    .await;
    assert!(output.is_playing(GUILD));

    coordinator.stop(GUILD).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_racing_skip_advances_once() {
    for _ in 0..20 {
        let h = Harness::new();
        for name in ["A", "B", "C"] {
            h.enqueue(GUILD, name).await;
        }

        assert!(h.output.finish(GUILD, None));
        let outcome = h.coordinator.skip(GUILD).await;
        assert!(matches!(outcome, CommandOutcome::Acknowledged(_)));

        wait_until("B to start", || h.output.plays(GUILD).len() >= 2).await;
        settle().await;

        let plays = h.output.plays(GUILD);
        let skipped_first = h.logger.events_for(GUILD).iter().any(|e| {
            e.event_type == SessionEventType::SkipRequested && e.details.contains("'A by")
        });

        if skipped_first {
            // Skip and completion both targeted A: they collapse into one advance.
            assert_eq!(plays, vec![stream_for("A"), stream_for("B")]);
            assert_eq!(h.count_events(GUILD, SessionEventType::Advance), 1);
            assert_eq!(h.count_advances(GUILD, &AdvanceCause::SkipRequested), 1);
            assert_eq!(h.coordinator.inspect(GUILD).current().map(|t| t.title()), Some("B"));
        } else {
            // A's completion was applied first, so the skip observed B playing.
            assert_eq!(plays, vec![stream_for("A"), stream_for("B"), stream_for("C")]);
            assert_eq!(h.count_advances(GUILD, &AdvanceCause::Normal), 1);
            assert_eq!(h.count_advances(GUILD, &AdvanceCause::SkipRequested), 1);
            assert_eq!(h.coordinator.inspect(GUILD).current().map(|t| t.title()), Some("C"));
        }

        assert_eq!(h.output.overlaps(), 0);
        assert_eq!(h.count_events(GUILD, SessionEventType::PlaybackError), 0);
        assert!(!h.notifier.saw(GUILD, "Error playing song"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_are_independent() {
    let h = Harness::new();

    assert!(h.enqueue(GUILD, "A").await.is_started());
    assert!(h.enqueue(OTHER_GUILD, "X").await.is_started());
    h.enqueue(GUILD, "B").await;

    h.coordinator.skip(OTHER_GUILD).await;
    wait_until("other guild to drain", || h.output.disconnects(OTHER_GUILD) == 1).await;

    assert_eq!(h.coordinator.inspect(GUILD).current().map(|t| t.title()), Some("A"));
    assert_eq!(titles(&h.coordinator.inspect(GUILD).queue), vec!["B"]);
    assert_eq!(h.output.disconnects(GUILD), 0);
    assert!(h.coordinator.inspect(OTHER_GUILD).is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_announcement_is_deferred_and_cancelled_by_skip() {
    let config = JukeboxConfig {
        announce_delay_ms: 150,
        ..JukeboxConfig::immediate()
    };
    let h = Harness::with_config(config);

    h.enqueue(GUILD, "Artist - First").await;
    h.enqueue(GUILD, "Artist - Second").await;
    assert!(!h.notifier.saw(GUILD, "Now playing"));
    h.coordinator.skip(GUILD).await;

    wait_until("second announcement", || {
        h.notifier.saw(GUILD, "Now playing - Artist - Second by Artist [1:00]")
    })
    .await;
    assert!(!h.notifier.saw(GUILD, "Now playing - Artist - First"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notifier_failures_do_not_break_playback() {
    let h = Harness::new();
    h.notifier.failing.store(true, Ordering::SeqCst);

    h.enqueue(GUILD, "A").await;
    h.enqueue(GUILD, "B").await;
    assert!(h.output.finish(GUILD, Some("network reset")));

    wait_until("B to start", || h.output.plays(GUILD).len() == 2).await;
    wait_until("notify failures logged", || {
        h.count_events(GUILD, SessionEventType::NotifyFailed) >= 1
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_disconnected_sessions_are_pruned() {
    let h = Harness::new();

    h.enqueue(GUILD, "A").await;
    h.enqueue(OTHER_GUILD, "X").await;
    assert_eq!(h.coordinator.prune_idle_sessions(), 0);

    assert!(h.output.finish(GUILD, None));
    wait_until("disconnect", || h.output.disconnects(GUILD) == 1).await;
    wait_until("prune", || h.coordinator.prune_idle_sessions() == 1).await;

    assert_eq!(h.coordinator.session_count(), 1);
    assert_eq!(h.coordinator.session_ids(), vec![OTHER_GUILD]);
}

fn ctx(session: SessionId) -> CommandContext {
    CommandContext::new(session, "tester", Some(voice()))
}

#[tokio::test]
async fn test_sing_flow_replies() {
    let h = Harness::new();
    let handler = h.handler(MockResolver::default());

    let first = handler
        .handle(&ctx(GUILD), ChatCommand::Sing { query: "Artist - One".to_string() })
        .await;
    assert!(first.is_started());

    let second = handler
        .handle(&ctx(GUILD), ChatCommand::Sing { query: "Artist - Two".to_string() })
        .await;
    assert!(second.is_queued());

    wait_until("announcement", || {
        h.notifier.saw(GUILD, "Now playing - Artist - One by Artist [1:00]")
    })
    .await;
    let messages = h.notifier.messages(GUILD);
    assert_eq!(messages[0], "Searching for your song...");
    assert!(messages.contains(&"Added to queue: Artist - Two by Artist".to_string()));
    assert!(!messages.contains(&"Added to queue: Artist - One by Artist".to_string()));
    assert_eq!(h.output.connects(), 1);
}

#[tokio::test]
async fn test_add_always_confirms() {
    let h = Harness::new();
    let handler = h.handler(MockResolver::default());

    let outcome = handler
        .handle(&ctx(GUILD), ChatCommand::Add { query: "Some Song".to_string() })
        .await;
    assert!(outcome.is_started());
    assert!(h.notifier.saw(GUILD, "Added to queue: Some Song by Mock Uploader"));
}

#[tokio::test]
async fn test_sing_validation() {
    let h = Harness::new();
    let handler = h.handler(MockResolver::default());

    match handler.handle(&ctx(GUILD), ChatCommand::Sing { query: "  ".to_string() }).await {
        CommandOutcome::Rejected(text) => assert_eq!(text, "Please provide a song name after !sing"),
        other => panic!("Expected Rejected, got {:?}", other),
    }

    let no_voice = CommandContext::new(GUILD, "tester", None);
    match handler.handle(&no_voice, ChatCommand::Add { query: "Song".to_string() }).await {
        CommandOutcome::Rejected(text) => {
            assert_eq!(text, "You need to be in a voice channel to use this command.")
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }

    assert_eq!(h.output.connects(), 0);
    assert!(h.coordinator.inspect(GUILD).is_idle());
}

#[tokio::test]
async fn test_resolution_failure_leaves_queue_untouched() {
    let h = Harness::new();
    let mut resolver = MockResolver::default();
    resolver.missing.insert("unknown song".to_string());
    let handler = h.handler(resolver);

    match handler
        .handle(&ctx(GUILD), ChatCommand::Sing { query: "unknown song".to_string() })
        .await
    {
        CommandOutcome::Failed(JukeboxError::ResolutionFailed(_)) => {}
        other => panic!("Expected ResolutionFailed, got {:?}", other),
    }
    assert!(h.coordinator.inspect(GUILD).is_idle());
    assert!(h.notifier.saw(GUILD, "Could not find that song: no results"));
    assert!(h.output.plays(GUILD).is_empty());
}

#[tokio::test]
async fn test_connect_failure_reported_before_search() {
    let h = Harness::new();
    h.output.refuse_connect(true);
    let handler = h.handler(MockResolver::default());

    let outcome = handler
        .handle(&ctx(GUILD), ChatCommand::Sing { query: "Song".to_string() })
        .await;
    assert!(matches!(outcome, CommandOutcome::Failed(JukeboxError::ConnectionUnavailable(_))));
    assert!(!h.notifier.saw(GUILD, "Searching for your song..."));
    assert!(h.notifier.saw(GUILD, "Could not connect to voice channel"));
}

#[tokio::test]
async fn test_queue_and_now_playing_commands() {
    let h = Harness::new();
    let handler = h.handler(MockResolver::default());

    match handler.handle(&ctx(GUILD), ChatCommand::Queue).await {
        CommandOutcome::Acknowledged(text) => assert_eq!(text, "The queue is empty."),
        other => panic!("Expected Acknowledged, got {:?}", other),
    }

    for query in ["Artist - One", "Artist - Two", "Artist - Three"] {
        handler
            .handle(&ctx(GUILD), ChatCommand::Sing { query: query.to_string() })
            .await;
    }

    match handler.handle(&ctx(GUILD), ChatCommand::Queue).await {
        CommandOutcome::Acknowledged(text) => assert_eq!(
            text,
            "**Now Playing:** Artist - One by Artist\n\n**Current queue:**\n1. Artist - Two by Artist\n2. Artist - Three by Artist"
        ),
        other => panic!("Expected Acknowledged, got {:?}", other),
    }

    match handler.handle(&ctx(GUILD), ChatCommand::NowPlaying).await {
        CommandOutcome::Acknowledged(text) => {
            assert_eq!(text, "**Now Playing:** Artist - One by Artist [1:00]")
        }
        other => panic!("Expected Acknowledged, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_skip_and_stop_commands_reply() {
    let h = Harness::new();
    let handler = h.handler(MockResolver::default());

    match handler.handle(&ctx(GUILD), ChatCommand::Skip).await {
        CommandOutcome::Rejected(_) => {}
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert!(h.notifier.saw(GUILD, "Nothing is playing right now."));

    handler
        .handle(&ctx(GUILD), ChatCommand::Sing { query: "Song".to_string() })
        .await;
    handler.handle(&ctx(GUILD), ChatCommand::Skip).await;
    assert!(h.notifier.saw(GUILD, "Skipping current song..."));

    wait_until("drain", || h.output.disconnects(GUILD) == 1).await;
    match handler.handle(&ctx(GUILD), ChatCommand::Stop).await {
        CommandOutcome::Rejected(text) => assert_eq!(text, "Not connected to a voice channel."),
        other => panic!("Expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ping_and_help() {
    let h = Harness::new();
    let handler = h.handler(MockResolver::default());

    match handler.handle(&ctx(GUILD), ChatCommand::Ping).await {
        CommandOutcome::Acknowledged(text) => {
            assert!(text.starts_with("Pong! Bot latency: "));
            assert!(text.ends_with("ms"));
        }
        other => panic!("Expected Acknowledged, got {:?}", other),
    }

    match handler.handle(&ctx(GUILD), ChatCommand::Help).await {
        CommandOutcome::Acknowledged(text) => assert!(text.contains("!sing <song>")),
        other => panic!("Expected Acknowledged, got {:?}", other),
    }
}
