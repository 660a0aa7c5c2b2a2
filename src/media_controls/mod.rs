//! The host's now-playing surface: lock screen, notification shade, media
//! keys overlay. The engine talks to it only through [`NowPlayingSurface`].

#[cfg(feature = "media-controls")]
mod souvlaki_surface;

#[cfg(feature = "media-controls")]
pub use souvlaki_surface::SouvlakiSurface;

use crate::episode::EpisodeMetadata;
use crate::playback::router::CommandKind;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Capability not supported by this host: {0}")]
    Unsupported(String),
    #[error("Host media session error: {0}")]
    Host(String),
}

/// Playback status as shown by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SurfaceStatus {
    Playing,
    Paused,
}

/// Position payload. Only sent once the duration is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionState {
    pub duration: f64,
    pub position: f64,
    /// Always positive. Hosts that miss a rate assume 1.0 and free-run.
    pub rate: f64,
}

/// Host-provided media control surface
pub trait NowPlayingSurface: Send {
    /// Called once per episode load
    fn set_metadata(&mut self, metadata: &EpisodeMetadata) -> Result<(), SurfaceError>;

    fn set_playback_state(&mut self, status: SurfaceStatus) -> Result<(), SurfaceError>;

    fn set_position_state(&mut self, state: PositionState) -> Result<(), SurfaceError>;

    /// Start delivering `command` from the host. Hosts lacking the
    /// capability return [`SurfaceError::Unsupported`].
    fn enable_command(&mut self, command: CommandKind) -> Result<(), SurfaceError>;
}
