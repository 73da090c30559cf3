//! Render coalescing.
//!
//! A render request either joins the render already pending or schedules
//! one no earlier than `interval` after the previous render began. The
//! pending render reads state when it runs, so it always sees the latest
//! values.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Slot {
    last: Option<Instant>,
    pending: bool,
}

/// Per-target render rate limiter.
#[derive(Debug)]
pub struct RenderThrottle {
    interval: Duration,
    slot: Mutex<Slot>,
}

impl RenderThrottle {
    /// Limit renders to one per `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Request a render. Returns the delay after which to run it, or `None`
    /// when a pending render will already pick the change up.
    pub fn request(&self) -> Option<Duration> {
        self.request_at(Instant::now())
    }

    pub(crate) fn request_at(&self, now: Instant) -> Option<Duration> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.pending {
            return None;
        }
        slot.pending = true;
        let delay = slot
            .last
            .and_then(|last| last.checked_add(self.interval))
            .map_or(Duration::ZERO, |ready| ready.saturating_duration_since(now));
        Some(delay)
    }

    /// Mark the pending render as running.
    pub fn begin(&self) {
        self.begin_at(Instant::now());
    }

    pub(crate) fn begin_at(&self, now: Instant) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.pending = false;
        slot.last = Some(now);
    }

    /// Whether a render is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(40);

    #[test]
    fn test_first_request_runs_immediately() {
        let t = RenderThrottle::new(INTERVAL);
        assert_eq!(t.request_at(Instant::now()), Some(Duration::ZERO));
        assert!(t.is_pending());
    }

    #[test]
    fn test_burst_coalesces_into_one_render() {
        let t = RenderThrottle::new(INTERVAL);
        let start = Instant::now();
        assert!(t.request_at(start).is_some());
        for i in 1..50 {
            assert_eq!(t.request_at(start + Duration::from_millis(i)), None);
        }
        t.begin_at(start);
        assert!(!t.is_pending());
    }

    #[test]
    fn test_spacing_between_renders() {
        let t = RenderThrottle::new(INTERVAL);
        let start = Instant::now();
        t.request_at(start);
        t.begin_at(start);

        let soon = start + Duration::from_millis(10);
        assert_eq!(t.request_at(soon), Some(Duration::from_millis(30)));
        t.begin_at(start + INTERVAL);

        let late = start + Duration::from_millis(200);
        assert_eq!(t.request_at(late), Some(Duration::ZERO));
    }
}
