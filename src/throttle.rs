//! Request pacing for the extraction backend
//!
//! The RequestThrottle spaces backend requests at least `min_interval` apart,
//! shared by every resolver call and download worker. Sites behind the
//! backend rate-limit aggressively; pacing keeps a bounded worker pool polite.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared request pacer
///
/// # Implementation
///
/// Uses AtomicU64 for lock-free slot reservation:
/// - `interval_nanos`: minimum spacing between requests (0 = unthrottled)
/// - `next_slot`: earliest time the next request may start (nanoseconds since
///   an arbitrary process-local epoch)
///
/// Each caller reserves the next free slot with a compare-exchange loop and
/// then sleeps until its slot arrives, so waiting callers are served in
/// reservation order.
#[derive(Clone, Debug)]
pub struct RequestThrottle {
    interval_nanos: Arc<AtomicU64>,
    next_slot: Arc<AtomicU64>,
}

impl RequestThrottle {
    /// Create a throttle with the given minimum interval (None = unthrottled)
    ///
    /// # Examples
    ///
    /// ```
    /// use media_dl::throttle::RequestThrottle;
    /// use std::time::Duration;
    ///
    /// // At most one backend request every 500ms
    /// let throttle = RequestThrottle::new(Some(Duration::from_millis(500)));
    ///
    /// // No pacing
    /// let unthrottled = RequestThrottle::new(None);
    /// assert_eq!(unthrottled.interval(), None);
    /// ```
    #[must_use]
    pub fn new(min_interval: Option<Duration>) -> Self {
        let nanos = min_interval.map(|d| d.as_nanos() as u64).unwrap_or(0);
        Self {
            interval_nanos: Arc::new(AtomicU64::new(nanos)),
            next_slot: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Change the minimum interval; takes effect for the next reservation
    pub fn set_interval(&self, min_interval: Option<Duration>) {
        let nanos = min_interval.map(|d| d.as_nanos() as u64).unwrap_or(0);
        self.interval_nanos.store(nanos, Ordering::SeqCst);
    }

    /// Current minimum interval
    pub fn interval(&self) -> Option<Duration> {
        let nanos = self.interval_nanos.load(Ordering::Relaxed);
        if nanos == 0 {
            None
        } else {
            Some(Duration::from_nanos(nanos))
        }
    }

    /// Wait until this caller may issue a request
    pub async fn acquire(&self) {
        let interval = self.interval_nanos.load(Ordering::Relaxed);
        if interval == 0 {
            return;
        }

        let slot = loop {
            let now = Self::now_nanos();
            let next = self.next_slot.load(Ordering::SeqCst);
            let slot = next.max(now);
            if self
                .next_slot
                .compare_exchange(next, slot + interval, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break slot;
            }
        };

        let now = Self::now_nanos();
        if slot > now {
            tokio::time::sleep(Duration::from_nanos(slot - now)).await;
        }
    }

    /// Monotonic time in nanoseconds since a process-local epoch
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(None)
    }
}
