use super::{NowPlayingSurface, PositionState, SurfaceError, SurfaceStatus};
use crate::config::PlatformConfig;
use crate::episode::EpisodeMetadata;
use crate::playback::router::{CommandKind, RemoteCommand};
use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, MediaPosition, SeekDirection,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, trace};

/// OS media session through souvlaki (MPRIS on Linux, MPNowPlayingInfoCenter
/// on macOS, SMTC on Windows).
///
/// Host button presses are forwarded as [`RemoteCommand`]s on the sender
/// given at construction, but only for commands that were enabled.
pub struct SouvlakiSurface {
    controls: MediaControls,
    enabled: Arc<Mutex<HashSet<CommandKind>>>,
    metadata: Option<EpisodeMetadata>,
    metadata_duration: Option<f64>,
    status: SurfaceStatus,
}

impl SouvlakiSurface {
    pub fn new(
        config: &PlatformConfig,
        remote_tx: tokio_mpsc::UnboundedSender<RemoteCommand>,
        seek_step: f64,
    ) -> Result<Self, SurfaceError> {
        let platform = souvlaki::PlatformConfig {
            dbus_name: &config.dbus_name,
            display_name: &config.display_name,
            hwnd: None,
        };

        let mut controls = MediaControls::new(platform).map_err(host_error)?;

        let enabled: Arc<Mutex<HashSet<CommandKind>>> = Arc::new(Mutex::new(HashSet::new()));
        let enabled_for_events = enabled.clone();

        controls
            .attach(move |event: MediaControlEvent| {
                let Some((kind, command)) = map_event(&event, seek_step) else {
                    debug!("Media control event ignored: {:?}", event);
                    return;
                };
                let is_enabled = enabled_for_events
                    .lock()
                    .map(|enabled| enabled.contains(&kind))
                    .unwrap_or(false);
                if !is_enabled {
                    debug!("Media control '{}' not enabled", kind.action_name());
                    return;
                }
                info!("Media control event received: {:?}", command);
                let _ = remote_tx.send(command);
            })
            .map_err(host_error)?;

        info!("Media controls initialized as {}", config.display_name);

        Ok(Self {
            controls,
            enabled,
            metadata: None,
            metadata_duration: None,
            status: SurfaceStatus::Paused,
        })
    }

    fn publish_metadata(&mut self) -> Result<(), SurfaceError> {
        let Some(metadata) = &self.metadata else {
            return Ok(());
        };
        let media_metadata = MediaMetadata {
            title: Some(metadata.title.as_str()),
            artist: Some(metadata.artist.as_str()),
            album: None,
            cover_url: metadata.cover_url(),
            duration: self.metadata_duration.map(Duration::from_secs_f64),
        };
        self.controls
            .set_metadata(media_metadata)
            .map_err(host_error)
    }
}

fn host_error(e: souvlaki::Error) -> SurfaceError {
    SurfaceError::Host(format!("{:?}", e))
}

/// Host event to the command it stands for
fn map_event(event: &MediaControlEvent, seek_step: f64) -> Option<(CommandKind, RemoteCommand)> {
    let signed = |direction: &SeekDirection, seconds: f64| match direction {
        SeekDirection::Forward => (CommandKind::SeekForward, RemoteCommand::SeekBy(seconds)),
        SeekDirection::Backward => (CommandKind::SeekBackward, RemoteCommand::SeekBy(-seconds)),
    };

    match event {
        MediaControlEvent::Play => Some((CommandKind::Play, RemoteCommand::Play)),
        MediaControlEvent::Pause => Some((CommandKind::Pause, RemoteCommand::Pause)),
        MediaControlEvent::Toggle => Some((CommandKind::Toggle, RemoteCommand::Toggle)),
        MediaControlEvent::Stop => Some((CommandKind::Stop, RemoteCommand::Stop)),
        MediaControlEvent::SetPosition(MediaPosition(position)) => Some((
            CommandKind::SeekTo,
            RemoteCommand::SeekTo(position.as_secs_f64()),
        )),
        MediaControlEvent::Seek(direction) => Some(signed(direction, seek_step)),
        MediaControlEvent::SeekBy(direction, by) => Some(signed(direction, by.as_secs_f64())),
        _ => None,
    }
}

impl NowPlayingSurface for SouvlakiSurface {
    fn set_metadata(&mut self, metadata: &EpisodeMetadata) -> Result<(), SurfaceError> {
        self.metadata = Some(metadata.clone());
        self.metadata_duration = None;
        self.publish_metadata()?;
        trace!("Updated media metadata: title={}", metadata.title);
        Ok(())
    }

    fn set_playback_state(&mut self, status: SurfaceStatus) -> Result<(), SurfaceError> {
        self.status = status;
        let playback = match status {
            SurfaceStatus::Playing => MediaPlayback::Playing { progress: None },
            SurfaceStatus::Paused => MediaPlayback::Paused { progress: None },
        };
        self.controls.set_playback(playback).map_err(host_error)
    }

    fn set_position_state(&mut self, state: PositionState) -> Result<(), SurfaceError> {
        // The host's progress bar reads the length from the metadata
        if self.metadata_duration != Some(state.duration) {
            self.metadata_duration = Some(state.duration);
            self.publish_metadata()?;
        }

        let progress = Some(MediaPosition(Duration::from_secs_f64(state.position.max(0.0))));
        let playback = match self.status {
            SurfaceStatus::Playing => MediaPlayback::Playing { progress },
            SurfaceStatus::Paused => MediaPlayback::Paused { progress },
        };
        if (state.rate - 1.0).abs() > f64::EPSILON {
            trace!("Host does not take a rate, {} not forwarded", state.rate);
        }
        self.controls.set_playback(playback).map_err(host_error)
    }

    fn enable_command(&mut self, command: CommandKind) -> Result<(), SurfaceError> {
        self.enabled
            .lock()
            .map_err(|_| SurfaceError::Host("command registry poisoned".to_string()))?
            .insert(command);
        Ok(())
    }
}
