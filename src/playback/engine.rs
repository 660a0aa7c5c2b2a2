use crate::config::SyncConfig;
use crate::episode::EpisodeMetadata;
use crate::media_controls::NowPlayingSurface;
use crate::playback::clock::Clock;
use crate::playback::progress::ProgressEmitter;
use crate::playback::router::{CommandKind, RemoteCommand, RemoteCommandRouter, Routed};
use crate::playback::scheduler::{PushTrigger, SyncScheduler, Transition};
use crate::playback::session::{PlaybackSession, SessionState, StreamLength};
use crate::playback::shadow_clock::{Correction, SeekOutcome, ShadowClock};
use crate::playback::transport::{AudioTransport, PlayFuture, TransportError, TransportEvent};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    #[error("Failed to load {source_id}: {source}")]
    LoadFailed {
        source_id: String,
        #[source]
        source: TransportError,
    },
    #[error("Playback of {source_id} was rejected: {source}")]
    PlayRejected {
        source_id: String,
        #[source]
        source: TransportError,
    },
    #[error("Invalid playback rate: {0}")]
    InvalidRate(f64),
}

/// A `play()` in flight, tagged with the session it was issued for
pub struct PendingPlay {
    pub generation: u64,
    pub future: PlayFuture,
}

/// Owns the playback session and keeps the now-playing surface in step
/// with it.
///
/// All state changes go through `&mut self`: transport events, remote
/// commands, resolved `play()` calls and scheduler timers. The engine does
/// no I/O of its own beyond calling the transport and the surface, so it
/// can be driven by [`crate::playback::PlaybackService`] or directly by
/// tests.
pub struct SyncEngine<T, S> {
    transport: T,
    surface: S,
    clock: Arc<dyn Clock>,
    scheduler: SyncScheduler,
    router: RemoteCommandRouter,
    progress: ProgressEmitter,
    session: PlaybackSession,
    spurious_epsilon: f64,
    seek_tolerance: f64,
    preferred_rate: f64,
    next_generation: u64,
    registered: Vec<CommandKind>,
}

impl<T: AudioTransport, S: NowPlayingSurface> SyncEngine<T, S> {
    pub fn new(
        transport: T,
        surface: S,
        config: &SyncConfig,
        clock: Arc<dyn Clock>,
        progress: ProgressEmitter,
    ) -> Self {
        let shadow = ShadowClock::new(config.spurious_epsilon, config.seek_tolerance);
        Self {
            transport,
            surface,
            clock,
            scheduler: SyncScheduler::new(config.scheduler),
            router: RemoteCommandRouter::new(config.seek_step_secs),
            progress,
            session: PlaybackSession::idle(shadow),
            spurious_epsilon: config.spurious_epsilon,
            seek_tolerance: config.seek_tolerance,
            preferred_rate: 1.0,
            next_generation: 0,
            registered: Vec::new(),
        }
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn router(&self) -> &RemoteCommandRouter {
        &self.router
    }

    /// Commands the surface accepted at registration
    pub fn registered_commands(&self) -> &[CommandKind] {
        &self.registered
    }

    /// Enable remote commands on the surface. Never fails as a whole.
    pub fn register_commands(&mut self) -> &[CommandKind] {
        self.registered = self.router.register(&mut self.surface);
        &self.registered
    }

    /// Replace the session with a fresh one for `url`
    pub fn load(
        &mut self,
        url: &str,
        metadata: Option<EpisodeMetadata>,
    ) -> Result<(), PlaybackError> {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.scheduler.cancel_all(generation);
        self.session = PlaybackSession::loading(
            generation,
            url.to_string(),
            metadata,
            ShadowClock::new(self.spurious_epsilon, self.seek_tolerance),
            self.preferred_rate,
        );
        info!("Loading source {} (session {})", url, generation);

        if let Err(e) = self.transport.load(url) {
            error!("Failed to load {}: {}", url, e);
            self.session.state = SessionState::Idle;
            self.progress.state_changed(Some(url), SessionState::Idle);
            self.progress.playback_failed(url, e.to_string());
            return Err(PlaybackError::LoadFailed {
                source_id: url.to_string(),
                source: e,
            });
        }

        if let Some(metadata) = self.session.metadata() {
            if let Err(e) = self.surface.set_metadata(metadata) {
                error!("Failed to set media metadata: {}", e);
            } else {
                trace!("Updated media metadata: title={}", metadata.title);
            }
        }

        self.progress.state_changed(Some(url), SessionState::Loading);
        Ok(())
    }

    /// Ask the transport to play the current source
    pub fn play(&mut self) -> Option<PendingPlay> {
        self.handle_remote(RemoteCommand::Play)
    }

    pub fn load_and_play(
        &mut self,
        url: &str,
        metadata: Option<EpisodeMetadata>,
    ) -> Result<Option<PendingPlay>, PlaybackError> {
        self.load(url, metadata)?;
        Ok(self.play())
    }

    /// Route a command from the surface (or the UI) into the transport
    pub fn handle_remote(&mut self, command: RemoteCommand) -> Option<PendingPlay> {
        let now = self.clock.now();
        debug!("Remote command: {:?}", command);
        match self.router.dispatch(
            command,
            &mut self.session,
            &mut self.transport,
            &mut self.scheduler,
            now,
        ) {
            Routed::Play(future) => Some(PendingPlay {
                generation: self.session.generation(),
                future,
            }),
            Routed::Done | Routed::Ignored => None,
        }
    }

    /// Seek to a percentage of the known duration (progress bar drag)
    pub fn seek_percent(&mut self, percent: f64) {
        if !percent.is_finite() {
            warn!("Ignoring non-finite seek percentage {}", percent);
            return;
        }
        match self.session.length().seconds() {
            Some(duration) => {
                let target = percent.clamp(0.0, 100.0) / 100.0 * duration;
                self.handle_remote(RemoteCommand::SeekTo(target));
            }
            None => debug!("Ignoring percentage seek, duration unknown"),
        }
    }

    /// Change the playback speed. Kept across loads.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), PlaybackError> {
        if !rate.is_finite() || rate <= 0.0 {
            warn!("Rejecting playback rate {}", rate);
            return Err(PlaybackError::InvalidRate(rate));
        }
        self.preferred_rate = rate;
        if self.session.accepts_commands() {
            // The rateChanged event drives the push
            self.transport.set_rate(rate);
        }
        Ok(())
    }

    /// Completion of a `play()` issued for session `generation`
    pub fn on_play_resolved(
        &mut self,
        generation: u64,
        result: Result<(), TransportError>,
    ) -> Result<(), PlaybackError> {
        if generation != self.session.generation() {
            debug!(
                "Ignoring play result for superseded session {} (current {})",
                generation,
                self.session.generation()
            );
            return Ok(());
        }

        match result {
            Ok(()) => {
                if (self.transport.rate() - self.preferred_rate).abs() > f64::EPSILON {
                    self.transport.set_rate(self.preferred_rate);
                }
                Ok(())
            }
            Err(e) => {
                let source_id = self.session.source_id().unwrap_or_default().to_string();
                warn!("Playback of {} failed: {}", source_id, e);
                if matches!(
                    self.session.state,
                    SessionState::Loading | SessionState::Playing
                ) {
                    self.set_state(SessionState::Paused);
                    self.push(PushTrigger::Transition(Transition::Paused));
                }
                self.progress.playback_failed(&source_id, e.to_string());
                Err(PlaybackError::PlayRejected {
                    source_id,
                    source: e,
                })
            }
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if !self.session.accepts_commands() {
            trace!(
                "Ignoring transport event {:?} in state {:?}",
                event,
                self.session.state()
            );
            return;
        }

        match event {
            TransportEvent::PositionUpdated { position, duration } => {
                self.on_position(position, duration)
            }
            TransportEvent::Started => self.on_started(),
            TransportEvent::Paused => self.on_paused(),
            TransportEvent::Seeked { position } => self.on_seeked(position),
            TransportEvent::RateChanged { rate } => self.on_rate_changed(rate),
            TransportEvent::DurationResolved { duration } => self.resolve_length(duration),
            TransportEvent::Ended => self.on_ended(),
            TransportEvent::Failed { error } => self.on_failed(error),
        }
    }

    /// When the driver should call [`SyncEngine::poll_timers`]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Fire expired scheduler timers
    pub fn poll_timers(&mut self) {
        let now = self.clock.now();
        if self.scheduler.poll(now, self.session.generation()) {
            self.push(PushTrigger::Transition(Transition::SeekCompleted));
        }
    }

    fn on_position(&mut self, raw_position: f64, raw_duration: f64) {
        let duration = self.session.length.seconds().unwrap_or(raw_duration);
        let is_playing = self.session.state == SessionState::Playing;
        let correction = self
            .session
            .clock
            .observe(raw_position, duration, is_playing);

        // Resolve after observing so the forced push carries this sample
        if self.session.length == StreamLength::Unknown {
            self.resolve_length(raw_duration);
        }

        match correction {
            Correction::Accepted(position) => {
                self.progress.emit(position, self.session.length);
                self.push(PushTrigger::Periodic);
            }
            Correction::SeekConfirmed(position) => {
                self.progress.emit(position, self.session.length);
                if self.scheduler.seek_confirmed(self.clock.now()) {
                    self.push(PushTrigger::Transition(Transition::SeekCompleted));
                }
            }
            Correction::SpuriousReset { hold } => {
                // Re-arm so the engine does not keep counting from zero
                self.transport.set_position(hold);
            }
            Correction::Held(_) | Correction::Ignored(_) => {}
        }
    }

    fn on_started(&mut self) {
        if self.session.state != SessionState::Playing {
            self.set_state(SessionState::Playing);
        }
        self.push(PushTrigger::Transition(Transition::Started));
    }

    fn on_paused(&mut self) {
        if matches!(
            self.session.state,
            SessionState::Playing | SessionState::Loading
        ) {
            self.set_state(SessionState::Paused);
        }
        self.push(PushTrigger::Transition(Transition::Paused));
    }

    fn on_seeked(&mut self, raw_position: f64) {
        let position = if raw_position.is_finite() {
            self.session.length.clamp(raw_position)
        } else {
            raw_position
        };

        match self.session.clock.confirm_seek(position) {
            SeekOutcome::Confirmed(position) => {
                self.progress.emit(position, self.session.length);
                if self.scheduler.seek_confirmed(self.clock.now()) {
                    self.push(PushTrigger::Transition(Transition::SeekCompleted));
                }
            }
            SeekOutcome::Unsolicited(position) => {
                debug!("Transport moved to {:.3}s without a pending seek", position);
                self.progress.emit(position, self.session.length);
                // An open settle window pushes when it expires
                if self.scheduler.seek_confirmed(self.clock.now()) {
                    self.push(PushTrigger::Transition(Transition::SeekCompleted));
                }
            }
            SeekOutcome::Stale => {}
        }
    }

    fn on_rate_changed(&mut self, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            warn!("Ignoring reported playback rate {}", rate);
            return;
        }
        self.session.rate = rate;
        self.preferred_rate = rate;
        self.push(PushTrigger::Transition(Transition::RateChanged));
    }

    fn resolve_length(&mut self, raw_duration: f64) {
        let length = StreamLength::from_raw(raw_duration);
        match (self.session.length, length) {
            (_, StreamLength::Unknown) => {}
            (StreamLength::Unknown, resolved) => {
                info!("Duration resolved: {:?}", resolved);
                self.session.length = resolved;
                if let Some(duration) = resolved.seconds() {
                    let position = self.session.clock.position();
                    if position > duration {
                        self.session.clock.settle_at(duration);
                    }
                }
                self.push(PushTrigger::Transition(Transition::DurationResolved));
            }
            (StreamLength::Known(current), StreamLength::Known(updated))
                if (current - updated).abs() > f64::EPSILON =>
            {
                debug!("Duration refined from {:.3}s to {:.3}s", current, updated);
                self.session.length = length;
            }
            _ => {}
        }
    }

    fn on_ended(&mut self) {
        if !matches!(
            self.session.state,
            SessionState::Playing | SessionState::Paused
        ) {
            return;
        }
        if let Some(duration) = self.session.length.seconds() {
            self.session.clock.settle_at(duration);
        }
        self.set_state(SessionState::Ended);
        self.push(PushTrigger::Transition(Transition::Ended));
        self.scheduler.cancel_all(self.session.generation());
        info!("Playback ended for session {}", self.session.generation());
    }

    fn on_failed(&mut self, error: TransportError) {
        let source_id = self.session.source_id().unwrap_or_default().to_string();
        error!("Playback of {} failed: {}", source_id, error);
        if matches!(
            self.session.state,
            SessionState::Loading | SessionState::Playing
        ) {
            self.set_state(SessionState::Paused);
        }
        self.push(PushTrigger::Transition(Transition::Paused));
        self.progress.playback_failed(&source_id, error.to_string());
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session state {:?} -> {:?}", self.session.state, state);
        self.session.state = state;
        self.progress
            .state_changed(self.session.source_id(), state);
    }

    /// Send the current snapshot to the surface if the scheduler allows it
    fn push(&mut self, trigger: PushTrigger) {
        let now = self.clock.now();
        if !self.scheduler.admit(trigger, now) {
            trace!("Push {:?} throttled", trigger);
            return;
        }

        let snapshot = self.session.snapshot();
        if self
            .scheduler
            .is_redundant(&snapshot, self.session.last_pushed())
        {
            trace!("Push {:?} skipped, surface already up to date", trigger);
            return;
        }

        if let Err(e) = self.surface.set_playback_state(snapshot.status) {
            error!("Failed to set playback state: {}", e);
        }
        if let Some(position_state) = snapshot.position_state() {
            if let Err(e) = self.surface.set_position_state(position_state) {
                error!("Failed to set position state: {}", e);
            }
        }

        trace!("Pushed {:?}: {:?}", trigger, snapshot);
        self.scheduler.record_push(now);
        self.session.last_pushed = Some(snapshot);
    }
}
