use crate::media_controls::NowPlayingSurface;
use crate::playback::scheduler::SyncScheduler;
use crate::playback::session::{PlaybackSession, SessionState};
use crate::playback::transport::{AudioTransport, PlayFuture};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default skip for the host's seek forward/backward buttons
pub const DEFAULT_SEEK_STEP_SECS: f64 = 15.0;

/// Commands arriving from the now-playing surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Play,
    Pause,
    Toggle,
    /// Absolute target in seconds
    SeekTo(f64),
    /// Offset in seconds from the authoritative position
    SeekBy(f64),
    Stop,
}

/// Host capabilities the router asks the surface to enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Play,
    Pause,
    Toggle,
    SeekTo,
    SeekBackward,
    SeekForward,
    Stop,
}

impl CommandKind {
    pub const ALL: [CommandKind; 7] = [
        CommandKind::Play,
        CommandKind::Pause,
        CommandKind::Toggle,
        CommandKind::SeekTo,
        CommandKind::SeekBackward,
        CommandKind::SeekForward,
        CommandKind::Stop,
    ];

    /// Name used by web-style media session hosts
    pub fn action_name(self) -> &'static str {
        match self {
            CommandKind::Play => "play",
            CommandKind::Pause => "pause",
            CommandKind::Toggle => "playpause",
            CommandKind::SeekTo => "seekto",
            CommandKind::SeekBackward => "seekbackward",
            CommandKind::SeekForward => "seekforward",
            CommandKind::Stop => "stop",
        }
    }
}

/// Result of routing one command
pub enum Routed {
    /// Nothing asynchronous to wait for
    Done,
    /// `transport.play()` was invoked; its completion must be reported back
    /// to the engine with the session generation it belongs to
    Play(PlayFuture),
    Ignored,
}

impl std::fmt::Debug for Routed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Routed::Done => f.write_str("Done"),
            Routed::Play(_) => f.write_str("Play(..)"),
            Routed::Ignored => f.write_str("Ignored"),
        }
    }
}

/// Bridges surface commands into transport calls.
///
/// Play and pause only poke the transport; the transport's own `started` /
/// `paused` events drive the state change and the push, so one command can
/// never produce two pushes. Seeks are tagged on the shadow clock first so
/// the landing position is trusted even when it is zero.
#[derive(Debug, Clone)]
pub struct RemoteCommandRouter {
    seek_step: f64,
}

impl Default for RemoteCommandRouter {
    fn default() -> Self {
        Self::new(DEFAULT_SEEK_STEP_SECS)
    }
}

impl RemoteCommandRouter {
    pub fn new(seek_step: f64) -> Self {
        Self { seek_step }
    }

    pub fn seek_step(&self) -> f64 {
        self.seek_step
    }

    /// Enable every command on the surface. Unsupported ones are skipped with
    /// a warning; registration never fails as a whole.
    pub fn register<S: NowPlayingSurface + ?Sized>(&self, surface: &mut S) -> Vec<CommandKind> {
        let mut registered = Vec::with_capacity(CommandKind::ALL.len());
        for kind in CommandKind::ALL {
            match surface.enable_command(kind) {
                Ok(()) => registered.push(kind),
                Err(e) => warn!(
                    "Failed to register remote command '{}': {}",
                    kind.action_name(),
                    e
                ),
            }
        }
        info!("Registered {} remote commands", registered.len());
        registered
    }

    /// Map a host button to a command
    pub fn command_for(&self, kind: CommandKind, seek_time: Option<f64>) -> Option<RemoteCommand> {
        match kind {
            CommandKind::Play => Some(RemoteCommand::Play),
            CommandKind::Pause => Some(RemoteCommand::Pause),
            CommandKind::Toggle => Some(RemoteCommand::Toggle),
            CommandKind::SeekTo => seek_time
                .filter(|t| t.is_finite())
                .map(RemoteCommand::SeekTo),
            CommandKind::SeekBackward => Some(RemoteCommand::SeekBy(-self.seek_step)),
            CommandKind::SeekForward => Some(RemoteCommand::SeekBy(self.seek_step)),
            CommandKind::Stop => Some(RemoteCommand::Stop),
        }
    }

    pub fn dispatch<T: AudioTransport + ?Sized>(
        &self,
        command: RemoteCommand,
        session: &mut PlaybackSession,
        transport: &mut T,
        scheduler: &mut SyncScheduler,
        now: Instant,
    ) -> Routed {
        if !session.accepts_commands() {
            debug!(
                "Ignoring remote command {:?} in state {:?}",
                command,
                session.state()
            );
            return Routed::Ignored;
        }

        match command {
            RemoteCommand::Play => Routed::Play(transport.play()),
            RemoteCommand::Pause => {
                transport.pause();
                Routed::Done
            }
            RemoteCommand::Toggle => {
                if session.state() == SessionState::Playing {
                    transport.pause();
                    Routed::Done
                } else {
                    Routed::Play(transport.play())
                }
            }
            RemoteCommand::SeekTo(target) => {
                if !target.is_finite() {
                    warn!("Ignoring non-finite seek target {}", target);
                    return Routed::Ignored;
                }
                self.seek(target, session, transport, scheduler, now);
                Routed::Done
            }
            RemoteCommand::SeekBy(offset) => {
                if !offset.is_finite() {
                    warn!("Ignoring non-finite seek offset {}", offset);
                    return Routed::Ignored;
                }
                // Relative to where we trust we are, never the raw transport
                let target = session.authoritative_position() + offset;
                self.seek(target, session, transport, scheduler, now);
                Routed::Done
            }
            RemoteCommand::Stop => {
                transport.pause();
                self.seek(0.0, session, transport, scheduler, now);
                Routed::Done
            }
        }
    }

    fn seek<T: AudioTransport + ?Sized>(
        &self,
        target: f64,
        session: &mut PlaybackSession,
        transport: &mut T,
        scheduler: &mut SyncScheduler,
        now: Instant,
    ) {
        let target = session.length().clamp(target);
        debug!("Seeking to {:.3}s", target);
        session.clock.record_seek(target);
        transport.set_position(target);
        scheduler.seek_requested(now);
    }
}
