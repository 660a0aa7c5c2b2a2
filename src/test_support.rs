// Test support utilities for both unit and integration tests

use crate::episode::EpisodeMetadata;
use crate::media_controls::{NowPlayingSurface, PositionState, SurfaceError, SurfaceStatus};
use crate::playback::clock::Clock;
use crate::playback::router::CommandKind;
use crate::playback::transport::{AudioTransport, PlayFuture, TransportError, TransportEvent};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc as tokio_mpsc, oneshot};

/// Clock that only moves when told to
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

/// Every call the engine made on the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Load(String),
    Play,
    Pause,
    SetPosition(f64),
    SetRate(f64),
}

enum PlayBehavior {
    Resolve(Result<(), TransportError>),
    Deferred(oneshot::Receiver<Result<(), TransportError>>),
}

struct MockTransportState {
    calls: Vec<TransportCall>,
    position: f64,
    duration: f64,
    rate: f64,
    load_error: Option<TransportError>,
    play_behaviors: VecDeque<PlayBehavior>,
    auto_events: bool,
}

/// In-memory transport.
///
/// Records calls and lets tests inject events. With `auto_events` enabled
/// it answers like a well-behaved engine: `started` after a successful play,
/// `paused` after pause, `seeked` after set_position, `rateChanged` after
/// set_rate.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
    events_tx: tokio_mpsc::UnboundedSender<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> (Self, tokio_mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = tokio_mpsc::unbounded_channel();
        let transport = Self {
            state: Arc::new(Mutex::new(MockTransportState {
                calls: Vec::new(),
                position: 0.0,
                duration: f64::NAN,
                rate: 1.0,
                load_error: None,
                play_behaviors: VecDeque::new(),
                auto_events: false,
            })),
            events_tx,
        };
        (transport, events_rx)
    }

    /// Transport that emits the events a real engine would
    pub fn with_auto_events() -> (Self, tokio_mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport, events_rx) = Self::new();
        transport.lock().auto_events = true;
        (transport, events_rx)
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn set_reported_position(&self, position: f64) {
        self.lock().position = position;
    }

    pub fn set_reported_duration(&self, duration: f64) {
        self.lock().duration = duration;
    }

    pub fn fail_next_load(&self, error: TransportError) {
        self.lock().load_error = Some(error);
    }

    /// The next `play()` resolves with `result`
    pub fn resolve_next_play(&self, result: Result<(), TransportError>) {
        self.lock()
            .play_behaviors
            .push_back(PlayBehavior::Resolve(result));
    }

    /// The next `play()` stays pending until the returned sender fires
    pub fn defer_next_play(&self) -> oneshot::Sender<Result<(), TransportError>> {
        let (tx, rx) = oneshot::channel();
        self.lock().play_behaviors.push_back(PlayBehavior::Deferred(rx));
        tx
    }

    /// Inject an event as if the engine emitted it
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_if_auto(&self, event: TransportEvent) {
        if self.lock().auto_events {
            self.emit(event);
        }
    }
}

impl AudioTransport for MockTransport {
    fn load(&mut self, url: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(TransportCall::Load(url.to_string()));
        if let Some(error) = state.load_error.take() {
            return Err(error);
        }
        state.position = 0.0;
        state.duration = f64::NAN;
        Ok(())
    }

    fn play(&mut self) -> PlayFuture {
        let (behavior, auto_events) = {
            let mut state = self.lock();
            state.calls.push(TransportCall::Play);
            let behavior = state
                .play_behaviors
                .pop_front()
                .unwrap_or(PlayBehavior::Resolve(Ok(())));
            (behavior, state.auto_events)
        };
        let events_tx = self.events_tx.clone();

        Box::pin(async move {
            let result = match behavior {
                PlayBehavior::Resolve(result) => result,
                PlayBehavior::Deferred(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(TransportError::Blocked("dropped".to_string()))),
            };
            if auto_events && result.is_ok() {
                let _ = events_tx.send(TransportEvent::Started);
            }
            result
        })
    }

    fn pause(&mut self) {
        self.lock().calls.push(TransportCall::Pause);
        self.emit_if_auto(TransportEvent::Paused);
    }

    fn position(&self) -> f64 {
        self.lock().position
    }

    fn duration(&self) -> f64 {
        self.lock().duration
    }

    fn set_position(&mut self, position: f64) {
        {
            let mut state = self.lock();
            state.calls.push(TransportCall::SetPosition(position));
            state.position = position;
        }
        self.emit_if_auto(TransportEvent::Seeked { position });
    }

    fn rate(&self) -> f64 {
        self.lock().rate
    }

    fn set_rate(&mut self, rate: f64) {
        {
            let mut state = self.lock();
            state.calls.push(TransportCall::SetRate(rate));
            state.rate = rate;
        }
        self.emit_if_auto(TransportEvent::RateChanged { rate });
    }
}

/// Every call the engine made on the surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Metadata(EpisodeMetadata),
    PlaybackState(SurfaceStatus),
    PositionState(PositionState),
    Enabled(CommandKind),
}

#[derive(Default)]
struct RecordingSurfaceState {
    calls: Vec<SurfaceCall>,
    unsupported: HashSet<CommandKind>,
    fail_position_state: bool,
    fail_metadata: bool,
}

/// Surface that records every call
#[derive(Clone, Default)]
pub struct RecordingSurface {
    state: Arc<Mutex<RecordingSurfaceState>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host that lacks `kind`
    pub fn without_command(self, kind: CommandKind) -> Self {
        self.state.lock().unwrap().unsupported.insert(kind);
        self
    }

    /// Host whose `set_position_state` always throws
    pub fn failing_position_state(self) -> Self {
        self.state.lock().unwrap().fail_position_state = true;
        self
    }

    /// Host whose `set_metadata` always throws
    pub fn failing_metadata(self) -> Self {
        self.state.lock().unwrap().fail_metadata = true;
        self
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// One push always sets the playback state first
    pub fn push_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SurfaceCall::PlaybackState(_)))
            .count()
    }

    pub fn position_states(&self) -> Vec<PositionState> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::PositionState(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn playback_states(&self) -> Vec<SurfaceStatus> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::PlaybackState(status) => Some(status),
                _ => None,
            })
            .collect()
    }
}

impl NowPlayingSurface for RecordingSurface {
    fn set_metadata(&mut self, metadata: &EpisodeMetadata) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_metadata {
            return Err(SurfaceError::Host("metadata rejected".to_string()));
        }
        state.calls.push(SurfaceCall::Metadata(metadata.clone()));
        Ok(())
    }

    fn set_playback_state(&mut self, status: SurfaceStatus) -> Result<(), SurfaceError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(SurfaceCall::PlaybackState(status));
        Ok(())
    }

    fn set_position_state(&mut self, position: PositionState) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_position_state {
            return Err(SurfaceError::Host("media channel busy".to_string()));
        }
        state.calls.push(SurfaceCall::PositionState(position));
        Ok(())
    }

    fn enable_command(&mut self, command: CommandKind) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        if state.unsupported.contains(&command) {
            return Err(SurfaceError::Unsupported(command.action_name().to_string()));
        }
        state.calls.push(SurfaceCall::Enabled(command));
        Ok(())
    }
}
