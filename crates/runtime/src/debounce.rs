use std::time::{Duration, Instant};

/// Explicit debounce state: either nothing is pending, or one value is
/// waiting for its quiescence deadline.
#[derive(Debug, Clone, PartialEq)]
pub enum DebounceState<T> {
    Idle,
    Debouncing { deadline: Instant, pending: T },
}

/// Collapses bursts of trigger events into a single delayed value.
///
/// Every `push` replaces the pending value and restarts the window, so only
/// the last value of a burst is ever released. Time is passed in by the
/// caller; the debouncer owns no timer of its own.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    window: Duration,
    state: DebounceState<T>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> &DebounceState<T> {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DebounceState::Debouncing { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            DebounceState::Idle => None,
            DebounceState::Debouncing { deadline, .. } => Some(*deadline),
        }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.state = DebounceState::Debouncing {
            deadline: now + self.window,
            pending: value,
        };
    }

    /// Releases the pending value once `now` has reached the deadline.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }
        match std::mem::replace(&mut self.state, DebounceState::Idle) {
            DebounceState::Debouncing { pending, .. } => Some(pending),
            DebounceState::Idle => None,
        }
    }

    pub fn cancel(&mut self) -> Option<T> {
        match std::mem::replace(&mut self.state, DebounceState::Idle) {
            DebounceState::Debouncing { pending, .. } => Some(pending),
            DebounceState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DebounceState, Debouncer};
    use std::time::{Duration, Instant};

    #[test]
    fn burst_releases_only_last_value() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(300));
        d.push(1, t0);
        d.push(2, t0 + Duration::from_millis(100));
        d.push(3, t0 + Duration::from_millis(250));

        // Window restarts on every push.
        assert_eq!(d.poll(t0 + Duration::from_millis(400)), None);
        assert_eq!(d.poll(t0 + Duration::from_millis(550)), Some(3));
        assert_eq!(d.poll(t0 + Duration::from_millis(900)), None);
        assert_eq!(d.state(), &DebounceState::Idle);
    }

    #[test]
    fn deadline_tracks_latest_push() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(300));
        assert_eq!(d.deadline(), None);
        d.push("a", t0);
        assert_eq!(d.deadline(), Some(t0 + Duration::from_millis(300)));
        d.push("b", t0 + Duration::from_millis(50));
        assert_eq!(d.deadline(), Some(t0 + Duration::from_millis(350)));
    }

    #[test]
    fn cancel_drops_pending() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(10));
        d.push(5, t0);
        assert_eq!(d.cancel(), Some(5));
        assert!(!d.is_pending());
        assert_eq!(d.poll(t0 + Duration::from_secs(1)), None);
    }
}
