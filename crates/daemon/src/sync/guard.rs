// Per-window "initializing" flag.
//
// While a window is being populated from the remote document, the browser
// reports every tab the restore opens. Those notifications must not be
// published back, so outbound sync checks this guard first. Expiry is
// evaluated lazily; no timers are involved.

use std::collections::HashMap;
use std::time::Duration;

use tably_common::types::WindowId;
use tokio::time::Instant;

/// Hard cap on how long a window may stay marked.
pub const DEFAULT_MAX_HOLD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct Hold {
    marked_at: Instant,
    settles_at: Option<Instant>,
}

#[derive(Debug)]
pub struct InitGuard {
    holds: HashMap<WindowId, Hold>,
    max_hold: Duration,
}

impl Default for InitGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOLD)
    }
}

impl InitGuard {
    pub fn new(max_hold: Duration) -> Self {
        Self { holds: HashMap::new(), max_hold }
    }

    pub fn mark(&mut self, window: WindowId) {
        self.mark_at(window, Instant::now());
    }

    pub fn mark_at(&mut self, window: WindowId, now: Instant) {
        self.holds.insert(window, Hold { marked_at: now, settles_at: None });
    }

    /// Release the window `delay` after now. A later call moves the release
    /// point, so the delay counts from the last restore.
    pub fn settle(&mut self, window: WindowId, delay: Duration) {
        self.settle_at(window, delay, Instant::now());
    }

    pub fn settle_at(&mut self, window: WindowId, delay: Duration, now: Instant) {
        let hold = self.holds.entry(window).or_insert(Hold { marked_at: now, settles_at: None });
        hold.settles_at = Some(now + delay);
    }

    /// Release immediately.
    pub fn clear(&mut self, window: WindowId) {
        self.holds.remove(&window);
    }

    pub fn is_initializing(&mut self, window: WindowId) -> bool {
        self.is_initializing_at(window, Instant::now())
    }

    pub fn is_initializing_at(&mut self, window: WindowId, now: Instant) -> bool {
        let Some(hold) = self.holds.get(&window).copied() else {
            return false;
        };
        let mut release = hold.marked_at + self.max_hold;
        if let Some(settles_at) = hold.settles_at {
            release = release.min(settles_at);
        }
        if now >= release {
            self.holds.remove(&window);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: WindowId = WindowId(1);

    #[test]
    fn unmarked_window_is_not_initializing() {
        let mut guard = InitGuard::default();
        assert!(!guard.is_initializing_at(W, Instant::now()));
    }

    #[test]
    fn mark_holds_until_settle_delay_passes() {
        let mut guard = InitGuard::default();
        let now = Instant::now();

        guard.mark_at(W, now);
        assert!(guard.is_initializing_at(W, now + Duration::from_secs(5)));

        guard.settle_at(W, Duration::from_millis(2000), now + Duration::from_secs(5));
        assert!(guard.is_initializing_at(W, now + Duration::from_millis(6999)));
        assert!(!guard.is_initializing_at(W, now + Duration::from_millis(7000)));
    }

    #[test]
    fn later_settle_extends_the_hold() {
        let mut guard = InitGuard::default();
        let now = Instant::now();

        guard.mark_at(W, now);
        guard.settle_at(W, Duration::from_millis(2000), now);
        guard.settle_at(W, Duration::from_millis(2000), now + Duration::from_millis(1500));
        assert!(guard.is_initializing_at(W, now + Duration::from_millis(3000)));
        assert!(!guard.is_initializing_at(W, now + Duration::from_millis(3500)));
    }

    #[test]
    fn forgotten_mark_is_released_by_the_cap() {
        let mut guard = InitGuard::new(Duration::from_secs(30));
        let now = Instant::now();

        guard.mark_at(W, now);
        assert!(guard.is_initializing_at(W, now + Duration::from_secs(29)));
        assert!(!guard.is_initializing_at(W, now + Duration::from_secs(30)));
    }

    #[test]
    fn clear_releases_immediately_and_only_that_window() {
        let mut guard = InitGuard::default();
        let now = Instant::now();

        guard.mark_at(W, now);
        guard.mark_at(WindowId(2), now);
        guard.clear(W);
        assert!(!guard.is_initializing_at(W, now));
        assert!(guard.is_initializing_at(WindowId(2), now));
    }
}
