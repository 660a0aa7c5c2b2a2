//! Authoritative position tracking.
//!
//! Some hosts report a playback position of zero in the middle of a track
//! (after a rate change, on resume, or when the system media session
//! rebinds). The shadow clock keeps the position we trust and decides, for
//! each raw transport sample, whether it is a genuine change.
//!
//! A zero is only believed when a seek to (near) zero was explicitly
//! requested through [`ShadowClock::record_seek`].

use tracing::{debug, warn};

pub const DEFAULT_SPURIOUS_EPSILON: f64 = 0.5;
pub const DEFAULT_SEEK_TOLERANCE: f64 = 0.25;

/// Backward jump during playback that is re-armed rather than held
pub const REARM_JUMP_SECS: f64 = 2.0;

/// Re-arms that did not take before the transport's position is believed
const MAX_REARM_ATTEMPTS: u32 = 3;

/// Samples that may miss a pending seek before it is given up
const MAX_UNCONFIRMED_SAMPLES: u32 = 8;

/// Outcome of feeding one raw sample to the clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Sample adopted as the new authoritative position
    Accepted(f64),
    /// Sample settled the pending seek
    SeekConfirmed(f64),
    /// Raw (near) zero or a large backward jump while well into the track.
    /// The transport should be re-armed to `hold`.
    SpuriousReset { hold: f64 },
    /// Sample went slightly backwards during playback; position kept
    Held(f64),
    /// Non-finite, negative, or a pre-seek straggler
    Ignored(f64),
}

impl Correction {
    /// The authoritative position after this sample
    pub fn position(&self) -> f64 {
        match *self {
            Correction::Accepted(p)
            | Correction::SeekConfirmed(p)
            | Correction::Held(p)
            | Correction::Ignored(p) => p,
            Correction::SpuriousReset { hold } => hold,
        }
    }

    /// Whether the sample moved (or confirmed) the authoritative position
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Correction::Accepted(_) | Correction::SeekConfirmed(_)
        )
    }
}

/// Result of a transport `seeked` notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekOutcome {
    /// The pending seek landed
    Confirmed(f64),
    /// No seek was pending; the transport moved by itself
    Unsolicited(f64),
    /// Confirmation for a target that has since been overwritten
    Stale,
}

#[derive(Debug, Clone)]
pub struct ShadowClock {
    position: f64,
    pending_seek: Option<f64>,
    seek_origin: f64,
    unconfirmed_samples: u32,
    rearm_attempts: u32,
    epsilon: f64,
    seek_tolerance: f64,
}

impl Default for ShadowClock {
    fn default() -> Self {
        Self::new(DEFAULT_SPURIOUS_EPSILON, DEFAULT_SEEK_TOLERANCE)
    }
}

impl ShadowClock {
    pub fn new(epsilon: f64, seek_tolerance: f64) -> Self {
        Self {
            position: 0.0,
            pending_seek: None,
            seek_origin: 0.0,
            unconfirmed_samples: 0,
            rearm_attempts: 0,
            epsilon,
            seek_tolerance,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.pending_seek
    }

    /// Feed one raw transport sample
    pub fn observe(&mut self, raw_position: f64, raw_duration: f64, is_playing: bool) -> Correction {
        if !raw_position.is_finite() || raw_position < 0.0 {
            debug!("Dropping invalid position sample: {}", raw_position);
            return Correction::Ignored(self.position);
        }

        let raw_position = clamp_to_duration(raw_position, raw_duration);

        if let Some(target) = self.pending_seek {
            if self.lands_on(raw_position, target) {
                self.settle_at(raw_position);
                return Correction::SeekConfirmed(raw_position);
            }

            self.unconfirmed_samples += 1;
            if self.unconfirmed_samples < MAX_UNCONFIRMED_SAMPLES {
                // Still reporting where we were before the seek
                return Correction::Ignored(self.position);
            }

            warn!(
                "Seek to {:.3}s never landed, transport reports {:.3}s",
                target, raw_position
            );
            if raw_position < self.epsilon && target > self.epsilon {
                self.settle_at(target);
                return Correction::SpuriousReset { hold: target };
            }
            self.settle_at(raw_position);
            return Correction::SeekConfirmed(raw_position);
        }

        if is_playing && self.position > self.epsilon && raw_position < self.epsilon {
            warn!(
                "Spurious position reset detected, holding at {:.3}s",
                self.position
            );
            self.rearm_attempts = self.rearm_attempts.saturating_add(1);
            return Correction::SpuriousReset {
                hold: self.position,
            };
        }

        if is_playing && raw_position < self.position {
            if self.position - raw_position < REARM_JUMP_SECS {
                return Correction::Held(self.position);
            }
            if self.rearm_attempts < MAX_REARM_ATTEMPTS {
                warn!(
                    "Position jumped back from {:.3}s to {:.3}s, re-arming",
                    self.position, raw_position
                );
                self.rearm_attempts += 1;
                return Correction::SpuriousReset {
                    hold: self.position,
                };
            }
            warn!(
                "Transport stays at {:.3}s after {} re-arms, adopting it",
                raw_position, self.rearm_attempts
            );
        }

        self.rearm_attempts = 0;
        self.position = raw_position;
        Correction::Accepted(raw_position)
    }

    /// Whether `raw_position` is where the seek to `target` ended up. Within
    /// tolerance always counts. Past the target counts too, unless the
    /// sample is still closer to where the seek started.
    fn lands_on(&self, raw_position: f64, target: f64) -> bool {
        let distance = (raw_position - target).abs();
        distance <= self.seek_tolerance
            || (raw_position >= target - self.seek_tolerance
                && distance < (raw_position - self.seek_origin).abs())
    }

    /// Tag an intended seek. The next sample near `target` confirms it, even
    /// if `target` is zero.
    pub fn record_seek(&mut self, target: f64) {
        match self.pending_seek {
            Some(previous) => {
                debug!("Seek to {:.3}s supersedes pending {:.3}s", target, previous)
            }
            None => self.seek_origin = self.position,
        }
        self.pending_seek = Some(target);
        self.unconfirmed_samples = 0;
        self.position = target;
    }

    /// Apply the transport's own report that a seek finished at `raw_position`
    pub fn confirm_seek(&mut self, raw_position: f64) -> SeekOutcome {
        if !raw_position.is_finite() || raw_position < 0.0 {
            return SeekOutcome::Stale;
        }

        match self.pending_seek {
            Some(target) if self.lands_on(raw_position, target) => {
                self.settle_at(raw_position);
                SeekOutcome::Confirmed(raw_position)
            }
            Some(target) => {
                debug!(
                    "Ignoring seek confirmation at {:.3}s, waiting for {:.3}s",
                    raw_position, target
                );
                SeekOutcome::Stale
            }
            None => {
                self.position = raw_position;
                SeekOutcome::Unsolicited(raw_position)
            }
        }
    }

    /// Forget everything about the previous source
    pub fn reset(&mut self) {
        self.settle_at(0.0);
        self.seek_origin = 0.0;
    }

    /// Pin the position without a seek, e.g. at end of stream
    pub(crate) fn settle_at(&mut self, position: f64) {
        self.position = position;
        self.pending_seek = None;
        self.unconfirmed_samples = 0;
        self.rearm_attempts = 0;
    }
}

fn clamp_to_duration(position: f64, duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 {
        position.min(duration)
    } else {
        position
    }
}
