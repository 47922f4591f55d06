//! In-flight activity tracking and safe socket shutdown.
//!
//! # Responsibilities
//! - Generate unique IDs for requests and cron runs
//! - Track which activities are running and since when
//! - Shut sockets down without failing on already-closed peers

use std::collections::HashMap;
use std::io;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use socket2::SockRef;

/// Global atomic counter for activity IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a request or cron run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a tracked activity is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Http,
    /// Cron thread number.
    Cron(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Activity {
    pub kind: ActivityKind,
    pub started: Instant,
}

impl Activity {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Registry of running activities, shared by the threads of one server.
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    active: Arc<Mutex<HashMap<ConnectionId, Activity>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new activity. Returns a guard that removes it on drop.
    pub fn track(&self, kind: ActivityKind) -> ActivityGuard {
        let id = ConnectionId::new();
        self.lock().insert(
            id,
            Activity {
                kind,
                started: Instant::now(),
            },
        );
        ActivityGuard {
            active: Arc::clone(&self.active),
            id,
        }
    }

    pub fn snapshot(&self) -> Vec<(ConnectionId, Activity)> {
        self.lock().iter().map(|(id, a)| (*id, *a)).collect()
    }

    pub fn http_in_flight(&self) -> usize {
        self.lock()
            .values()
            .filter(|a| a.kind == ActivityKind::Http)
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Activity>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Guard that tracks an activity's lifetime.
#[derive(Debug)]
pub struct ActivityGuard {
    active: Arc<Mutex<HashMap<ConnectionId, Activity>>>,
    id: ConnectionId,
}

impl ActivityGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
        tracing::trace!(activity_id = %self.id, "Activity finished");
    }
}

/// Shut a socket down in both directions.
///
/// A socket that is already closed or was never connected is not an error,
/// so calling this twice is safe. The descriptor itself is released when its
/// owner is dropped.
pub fn close_socket<S: AsFd>(sock: &S) -> io::Result<()> {
    match SockRef::from(sock).shutdown(std::net::Shutdown::Both) {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.raw_os_error(), Some(code) if code == Errno::EBADF as i32 || code == Errno::ENOTCONN as i32) => {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_tracker_counts_http() {
        let tracker = ActivityTracker::new();
        let http = tracker.track(ActivityKind::Http);
        let _cron = tracker.track(ActivityKind::Cron(0));

        assert_eq!(tracker.active_count(), 2);
        assert_eq!(tracker.http_in_flight(), 1);

        drop(http);
        assert_eq!(tracker.http_in_flight(), 0);
        assert_eq!(tracker.snapshot()[0].1.kind, ActivityKind::Cron(0));
    }

    #[test]
    fn test_close_socket_twice() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        close_socket(&client).unwrap();
        close_socket(&client).unwrap();
        close_socket(&server).unwrap();
    }

    #[test]
    fn test_close_socket_after_peer_reset() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        SockRef::from(&client)
            .set_linger(Some(std::time::Duration::ZERO))
            .unwrap();
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(50));

        close_socket(&server).unwrap();
        close_socket(&server).unwrap();
    }

    #[test]
    fn test_close_socket_after_peer_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(50));

        close_socket(&server).unwrap();
        close_socket(&server).unwrap();
    }

    #[test]
    fn test_close_unconnected_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        close_socket(&listener).unwrap();
        close_socket(&listener).unwrap();
    }
}
