//! Shutdown coordination.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::lifecycle::signals::SupervisorSignal;

/// Coordinator for graceful shutdown of async tasks.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop token for blocking threads.
///
/// Threads sleep on it instead of `thread::sleep` so a stop wakes them
/// immediately.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep up to `timeout`. Returns true when stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (stopped, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *stopped
    }
}

/// Outcome of a quit-type signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitAction {
    /// Start the graceful unwind.
    Graceful,
    /// Already unwinding: exit now.
    ForceExit,
    Ignore,
}

/// Counts termination requests of the threaded server.
#[derive(Debug, Default)]
pub struct QuitSignals {
    received: AtomicUsize,
    restart: AtomicBool,
}

impl QuitSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_signal(&self, signal: SupervisorSignal) -> QuitAction {
        match signal {
            SupervisorSignal::Stop => {
                if self.received.fetch_add(1, Ordering::SeqCst) > 0 {
                    QuitAction::ForceExit
                } else {
                    QuitAction::Graceful
                }
            }
            SupervisorSignal::Restart => {
                self.restart.store(true, Ordering::SeqCst);
                if self.received.fetch_add(1, Ordering::SeqCst) > 0 {
                    QuitAction::Ignore
                } else {
                    QuitAction::Graceful
                }
            }
            _ => QuitAction::Ignore,
        }
    }

    pub fn request_restart(&self) -> QuitAction {
        self.on_signal(SupervisorSignal::Restart)
    }

    pub fn restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_second_stop_forces_exit() {
        let quit = QuitSignals::new();
        assert_eq!(quit.on_signal(SupervisorSignal::Stop), QuitAction::Graceful);
        assert_eq!(quit.on_signal(SupervisorSignal::Stop), QuitAction::ForceExit);
        assert!(!quit.restart_requested());
    }

    #[test]
    fn test_stop_after_restart_forces_exit() {
        let quit = QuitSignals::new();
        assert_eq!(quit.on_signal(SupervisorSignal::Restart), QuitAction::Graceful);
        assert_eq!(quit.on_signal(SupervisorSignal::Restart), QuitAction::Ignore);
        assert_eq!(quit.on_signal(SupervisorSignal::Stop), QuitAction::ForceExit);
        assert!(quit.restart_requested());
    }

    #[test]
    fn test_stop_flag_wakes_sleeper() {
        let flag = StopFlag::new();
        let sleeper = flag.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || sleeper.wait_timeout(Duration::from_secs(30)));

        std::thread::sleep(Duration::from_millis(20));
        flag.stop();

        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(flag.is_stopped());
    }

    #[test]
    fn test_stop_flag_times_out() {
        let flag = StopFlag::new();
        assert!(!flag.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_shutdown_broadcast() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.trigger();
        assert!(rx.try_recv().is_ok());
    }
}
