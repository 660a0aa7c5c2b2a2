use crate::playback::session::PushSnapshot;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_millis(15);
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_millis(2000);

/// Float tolerance for deciding two pushes are the same
pub const PUSH_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Steady-state throttle between periodic pushes
    pub min_interval: Duration,
    /// Quiet period after the latest seek request before the post-seek push
    pub settle_window: Duration,
    /// Transitions push immediately instead of waiting for the throttle
    pub force_on_transition: bool,
    /// Longest a seek may wait for the transport's confirmation before the
    /// surface is released anyway
    pub confirm_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            settle_window: DEFAULT_SETTLE_WINDOW,
            force_on_transition: true,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }
}

/// Discrete changes that warrant an immediate push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Paused,
    SeekCompleted,
    RateChanged,
    DurationResolved,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTrigger {
    /// Ordinary position sample during steady playback
    Periodic,
    Transition(Transition),
}

#[derive(Debug, Clone, Copy)]
struct SettleTimer {
    deadline: Instant,
    generation: u64,
}

/// Decides when the authoritative state goes out to the now-playing surface.
///
/// Hosts react badly to a flood of position updates, so periodic samples are
/// throttled and seek bursts are debounced. Transitions skip the throttle.
#[derive(Debug)]
pub struct SyncScheduler {
    config: SchedulerConfig,
    generation: u64,
    last_push_at: Option<Instant>,
    settle: Option<SettleTimer>,
    awaiting_confirm: bool,
    confirm_deadline: Option<Instant>,
}

impl SyncScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            generation: 0,
            last_push_at: None,
            settle: None,
            awaiting_confirm: false,
            confirm_deadline: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// A seek has been requested and not yet settled
    pub fn seek_in_flight(&self) -> bool {
        self.awaiting_confirm || self.settle.is_some()
    }

    /// Whether a push for `trigger` may go out at `now`
    pub fn admit(&self, trigger: PushTrigger, now: Instant) -> bool {
        match trigger {
            PushTrigger::Transition(_) if self.config.force_on_transition => true,
            PushTrigger::Transition(Transition::SeekCompleted) => self.throttle_open(now),
            PushTrigger::Transition(_) | PushTrigger::Periodic => {
                !self.seek_in_flight() && self.throttle_open(now)
            }
        }
    }

    fn throttle_open(&self, now: Instant) -> bool {
        self.last_push_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.min_interval)
    }

    /// Whether `snapshot` would repeat what the surface already shows
    pub fn is_redundant(&self, snapshot: &PushSnapshot, last: Option<&PushSnapshot>) -> bool {
        last.is_some_and(|last| snapshot.approx_eq(last, PUSH_TOLERANCE))
    }

    /// A push went out; restart the throttle window
    pub fn record_push(&mut self, now: Instant) {
        self.last_push_at = Some(now);
    }

    /// Open (or restart) the settle window for a new seek request
    pub fn seek_requested(&mut self, now: Instant) {
        self.settle = Some(SettleTimer {
            deadline: now + self.config.settle_window,
            generation: self.generation,
        });
        self.awaiting_confirm = true;
        self.confirm_deadline = Some(now + self.config.confirm_timeout);
    }

    /// The transport confirmed the latest seek. Returns true when the
    /// post-seek push is due now, false when the settle window is still open.
    pub fn seek_confirmed(&mut self, now: Instant) -> bool {
        self.awaiting_confirm = false;
        self.confirm_deadline = None;
        match self.settle {
            Some(timer) if timer.generation == self.generation && timer.deadline > now => false,
            _ => {
                self.settle = None;
                true
            }
        }
    }

    /// Fire the settle timer if it expired. Returns true when the post-seek
    /// push is due.
    pub fn poll(&mut self, now: Instant, generation: u64) -> bool {
        let Some(timer) = self.settle else {
            return self.poll_confirm_timeout(now, generation);
        };
        if timer.generation != generation || timer.generation != self.generation {
            trace!("Dropping settle timer from session {}", timer.generation);
            self.settle = None;
            return false;
        }
        if now < timer.deadline {
            return false;
        }
        self.settle = None;
        // Without confirmation the confirmation itself will trigger the push
        !self.awaiting_confirm
    }

    /// Stop waiting for a confirmation the transport never sent
    fn poll_confirm_timeout(&mut self, now: Instant, generation: u64) -> bool {
        match self.confirm_deadline {
            Some(deadline) if generation == self.generation && now >= deadline => {
                warn!("Seek confirmation timed out, releasing surface pushes");
                self.awaiting_confirm = false;
                self.confirm_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// When the driver should call [`SyncScheduler::poll`] next
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.settle {
            Some(timer) => Some(timer.deadline),
            None if self.awaiting_confirm => self.confirm_deadline,
            None => None,
        }
    }

    /// Cancel every timer and window; the next session starts clean
    pub fn cancel_all(&mut self, generation: u64) {
        if self.settle.is_some() {
            trace!("Cancelling settle timer for session {}", self.generation);
        }
        self.generation = generation;
        self.last_push_at = None;
        self.settle = None;
        self.awaiting_confirm = false;
        self.confirm_deadline = None;
    }
}
