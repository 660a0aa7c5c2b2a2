use crate::episode::EpisodeMetadata;
use crate::media_controls::{PositionState, SurfaceStatus};
use crate::playback::shadow_clock::ShadowClock;
use serde::Serialize;

/// Lifecycle state of the loaded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
}

impl SessionState {
    /// What the now-playing surface shows for this state.
    /// The surface only knows playing and paused.
    pub fn surface_status(self) -> SurfaceStatus {
        match self {
            SessionState::Playing => SurfaceStatus::Playing,
            SessionState::Idle
            | SessionState::Loading
            | SessionState::Paused
            | SessionState::Ended => SurfaceStatus::Paused,
        }
    }
}

/// Total length of the loaded stream.
///
/// `Live` is an open-ended stream (the transport reported an infinite
/// duration). It reports exactly like `Unknown` but is never replaced by a
/// later "resolution".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamLength {
    Unknown,
    Live,
    Known(f64),
}

impl StreamLength {
    /// Classify a raw transport duration
    pub fn from_raw(raw: f64) -> Self {
        if raw.is_finite() && raw > 0.0 {
            StreamLength::Known(raw)
        } else if raw == f64::INFINITY {
            StreamLength::Live
        } else {
            StreamLength::Unknown
        }
    }

    pub fn seconds(self) -> Option<f64> {
        match self {
            StreamLength::Known(seconds) => Some(seconds),
            StreamLength::Unknown | StreamLength::Live => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, StreamLength::Known(_))
    }

    /// Clamp a position into `[0, duration]`, or `[0, ∞)` when the length
    /// is not known.
    pub fn clamp(self, position: f64) -> f64 {
        let position = position.max(0.0);
        match self {
            StreamLength::Known(duration) => position.min(duration),
            StreamLength::Unknown | StreamLength::Live => position,
        }
    }
}

/// What was last sent to the now-playing surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushSnapshot {
    pub status: SurfaceStatus,
    pub position: f64,
    pub duration: Option<f64>,
    pub rate: f64,
}

impl PushSnapshot {
    /// Position payload for the surface; `None` while the duration is unknown
    pub fn position_state(&self) -> Option<PositionState> {
        self.duration.map(|duration| PositionState {
            duration,
            position: self.position,
            rate: self.rate,
        })
    }

    /// Equal within `tolerance` on every float field
    pub fn approx_eq(&self, other: &PushSnapshot, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance;
        self.status == other.status
            && close(self.rate, other.rate)
            && match (self.duration, other.duration) {
                (Some(a), Some(b)) => close(a, b) && close(self.position, other.position),
                (None, None) => true,
                _ => false,
            }
    }
}

/// The single mutable playback entity. Replaced wholesale on every load.
#[derive(Debug)]
pub struct PlaybackSession {
    generation: u64,
    source_id: Option<String>,
    metadata: Option<EpisodeMetadata>,
    pub(crate) length: StreamLength,
    pub(crate) clock: ShadowClock,
    pub(crate) rate: f64,
    pub(crate) state: SessionState,
    pub(crate) last_pushed: Option<PushSnapshot>,
}

impl PlaybackSession {
    /// Session with nothing loaded
    pub fn idle(clock: ShadowClock) -> Self {
        Self {
            generation: 0,
            source_id: None,
            metadata: None,
            length: StreamLength::Unknown,
            clock,
            rate: 1.0,
            state: SessionState::Idle,
            last_pushed: None,
        }
    }

    /// Fresh session for a newly loaded source
    pub fn loading(
        generation: u64,
        source_id: String,
        metadata: Option<EpisodeMetadata>,
        mut clock: ShadowClock,
        rate: f64,
    ) -> Self {
        clock.reset();
        Self {
            generation,
            source_id: Some(source_id),
            metadata,
            length: StreamLength::Unknown,
            clock,
            rate,
            state: SessionState::Loading,
            last_pushed: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn metadata(&self) -> Option<&EpisodeMetadata> {
        self.metadata.as_ref()
    }

    pub fn length(&self) -> StreamLength {
        self.length
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn authoritative_position(&self) -> f64 {
        self.clock.position()
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.clock.pending_seek()
    }

    pub fn last_pushed(&self) -> Option<&PushSnapshot> {
        self.last_pushed.as_ref()
    }

    /// Whether remote commands and seeks apply to this session
    pub fn accepts_commands(&self) -> bool {
        matches!(
            self.state,
            SessionState::Loading | SessionState::Playing | SessionState::Paused
        )
    }

    /// Snapshot of what a push would send right now
    pub fn snapshot(&self) -> PushSnapshot {
        PushSnapshot {
            status: self.state.surface_status(),
            position: self.clock.position(),
            duration: self.length.seconds(),
            rate: self.rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_length_classification() {
        assert_eq!(StreamLength::from_raw(300.0), StreamLength::Known(300.0));
        assert_eq!(StreamLength::from_raw(f64::INFINITY), StreamLength::Live);
        assert_eq!(StreamLength::from_raw(f64::NAN), StreamLength::Unknown);
        assert_eq!(StreamLength::from_raw(0.0), StreamLength::Unknown);
        assert_eq!(StreamLength::from_raw(-4.0), StreamLength::Unknown);
    }

    #[test]
    fn test_clamp_respects_known_length_only() {
        assert_eq!(StreamLength::Known(100.0).clamp(120.0), 100.0);
        assert_eq!(StreamLength::Known(100.0).clamp(-3.0), 0.0);
        assert_eq!(StreamLength::Unknown.clamp(5000.0), 5000.0);
        assert_eq!(StreamLength::Live.clamp(-1.0), 0.0);
    }

    #[test]
    fn test_snapshot_without_duration_has_no_position_payload() {
        let session = PlaybackSession::loading(
            1,
            "https://example.com/a.mp3".to_string(),
            None,
            ShadowClock::default(),
            1.0,
        );
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SurfaceStatus::Paused);
        assert!(snapshot.position_state().is_none());
    }

    #[test]
    fn test_snapshot_approx_eq() {
        let a = PushSnapshot {
            status: SurfaceStatus::Playing,
            position: 10.0,
            duration: Some(300.0),
            rate: 1.0,
        };
        let b = PushSnapshot {
            position: 10.0004,
            ..a
        };
        let c = PushSnapshot {
            position: 11.0,
            ..a
        };
        let d = PushSnapshot { duration: None, ..a };
        assert!(a.approx_eq(&b, 1e-3));
        assert!(!a.approx_eq(&c, 1e-3));
        assert!(!a.approx_eq(&d, 1e-3));
    }
}
