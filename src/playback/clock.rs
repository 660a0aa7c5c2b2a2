use std::time::Instant;

/// Source of "now" for the sync scheduler.
///
/// The engine never calls `Instant::now()` directly so throttle and settle
/// windows can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by the monotonic system timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
