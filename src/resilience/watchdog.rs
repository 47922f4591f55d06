//! Wall-clock liveness deadline of one worker.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    last_seen: Instant,
    timeout: Option<Duration>,
}

impl Watchdog {
    /// `None` disables the deadline.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            last_seen: Instant::now(),
            timeout,
        }
    }

    /// The worker pinged.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now.saturating_duration_since(self.last_seen) >= timeout,
            None => false,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.last_seen -= by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_after_timeout() {
        let mut watchdog = Watchdog::new(Some(Duration::from_secs(5)));
        assert!(!watchdog.is_expired(Instant::now()));

        watchdog.backdate(Duration::from_secs(6));
        assert!(watchdog.is_expired(Instant::now()));

        watchdog.touch();
        assert!(!watchdog.is_expired(Instant::now()));
    }

    #[test]
    fn test_disabled_never_expires() {
        let mut watchdog = Watchdog::new(None);
        watchdog.backdate(Duration::from_secs(3600));
        assert!(!watchdog.is_expired(Instant::now()));
    }
}
