use std::time::Duration;

pub const DEFAULT_SLEEP_DURATION: Duration = Duration::from_secs(900);

/// Single countdown that stops playback when it elapses.  The periodic
/// wakeup is the host's job; this only does the bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct SleepTimer {
    remaining: Duration,
    running: bool,
}

impl SleepTimer {
    /// Start the timer, or add `duration` to the time left if it is already
    /// counting down.  Returns the new remaining time.
    pub fn start(&mut self, duration: Duration) -> Duration {
        if self.running {
            self.remaining += duration;
        } else {
            self.remaining = duration;
            self.running = true;
        }
        self.remaining
    }

    /// Count down by `elapsed`.  Returns true exactly once, when the timer
    /// runs out; the caller stops playback.
    pub fn tick(&mut self, elapsed: Duration) -> bool {
        if !self.running {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(elapsed);
        if self.remaining.is_zero() {
            self.running = false;
            return true;
        }
        false
    }

    pub fn cancel(&mut self) {
        self.running = false;
        self.remaining = Duration::ZERO;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Time left, `None` when inactive.
    pub fn remaining(&self) -> Option<Duration> {
        self.running.then_some(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_fresh() {
        let mut t = SleepTimer::default();
        assert_eq!(t.remaining(), None);
        assert_eq!(t.start(DEFAULT_SLEEP_DURATION), Duration::from_secs(900));
        assert!(t.is_running());
    }

    #[test]
    fn test_restart_accumulates() {
        let mut t = SleepTimer::default();
        t.start(DEFAULT_SLEEP_DURATION);
        assert!(!t.tick(Duration::from_secs(100)));
        t.start(DEFAULT_SLEEP_DURATION);
        assert_eq!(t.remaining(), Some(Duration::from_secs(1700)));
    }

    #[test]
    fn test_fires_once() {
        let mut t = SleepTimer::default();
        t.start(Duration::from_secs(2));
        assert!(!t.tick(Duration::from_secs(1)));
        assert!(t.tick(Duration::from_secs(5)));
        assert!(!t.is_running());
        assert_eq!(t.remaining(), None);
        assert!(!t.tick(Duration::from_secs(1)));

        // a new start after finishing begins at exactly the default again
        assert_eq!(t.start(Duration::from_secs(900)), Duration::from_secs(900));
    }

    #[test]
    fn test_cancel_idempotent() {
        let mut t = SleepTimer::default();
        t.cancel();
        t.start(Duration::from_secs(60));
        t.cancel();
        t.cancel();
        assert!(!t.is_running());
        assert_eq!(t.remaining(), None);
    }
}
