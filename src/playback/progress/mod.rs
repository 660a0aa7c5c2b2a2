pub mod format;
pub mod handle;

use crate::playback::session::{SessionState, StreamLength};
pub use format::{duration_label, format_time};
pub use handle::PlaybackProgressHandle;
use serde::Serialize;
use tokio::sync::mpsc as tokio_mpsc;

/// Progress updates during playback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackProgress {
    StateChanged {
        source_id: Option<String>,
        state: SessionState,
    },
    PositionUpdate {
        /// 0-100, 0 while the duration is unknown
        percent: f64,
        current_label: String,
        duration_label: String,
        position: f64,
    },
    PlaybackFailed {
        source_id: String,
        error: String,
    },
}

/// Turns authoritative position/duration into UI progress events.
///
/// Not throttled: every accepted sample goes out.
#[derive(Clone)]
pub struct ProgressEmitter {
    tx: tokio_mpsc::UnboundedSender<PlaybackProgress>,
}

impl ProgressEmitter {
    pub fn new(tx: tokio_mpsc::UnboundedSender<PlaybackProgress>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, position: f64, length: StreamLength) {
        let _ = self.tx.send(progress_update(position, length));
    }

    pub fn state_changed(&self, source_id: Option<&str>, state: SessionState) {
        let _ = self.tx.send(PlaybackProgress::StateChanged {
            source_id: source_id.map(str::to_string),
            state,
        });
    }

    pub fn playback_failed(&self, source_id: &str, error: String) {
        let _ = self.tx.send(PlaybackProgress::PlaybackFailed {
            source_id: source_id.to_string(),
            error,
        });
    }
}

fn progress_update(position: f64, length: StreamLength) -> PlaybackProgress {
    let total = length.seconds().unwrap_or(f64::NAN);
    let percent = match length.seconds() {
        Some(duration) if position.is_finite() => (position / duration * 100.0).clamp(0.0, 100.0),
        _ => 0.0,
    };

    PlaybackProgress::PositionUpdate {
        percent,
        current_label: format_time(position, total),
        duration_label: duration_label(length),
        position,
    }
}
