//! Server supervisors.
//!
//! # Data Flow
//! ```text
//! main
//!   ├─ workers == 0  → threaded.rs  (HTTP thread + cron threads, one process)
//!   ├─ workers > 0   → prefork.rs   (master + forked workers via process.rs)
//!   └─ `evented`     → evented.rs   (long-polling companion of the master)
//!
//! every server
//!   → run() → ExitOutcome::{Stopped, Restart}
//!   → on Restart main re-execs the binary
//! ```
//!
//! # Design Decisions
//! - The entry point owns the server; nothing is global
//! - Stop hooks registered on `CommonServer` run exactly once
//! - Process creation sits behind `ProcessControl` so pool logic can be
//!   exercised without forking

pub mod evented;
pub mod prefork;
pub mod process;
pub mod threaded;

use std::io;
use std::os::fd::AsFd;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::HttpConfig;
use crate::registry::JobError;

pub use evented::EventedServer;
pub use prefork::PreforkServer;
pub use process::{ChildExit, ForkProcessControl, ProcessControl};
pub use threaded::{StopHandle, ThreadedServer};

/// How a server run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Stopped,
    /// Re-exec the binary.
    Restart,
}

type StopHook = Box<dyn FnOnce() -> Result<(), JobError> + Send>;

/// State shared by every server flavour.
pub struct CommonServer {
    pub interface: String,
    pub port: u16,
    pub pid: i32,
    hooks: Vec<(String, StopHook)>,
}

impl CommonServer {
    pub fn new(http: &HttpConfig) -> Self {
        Self {
            interface: http.interface.clone(),
            port: http.port,
            pid: nix::unistd::getpid().as_raw(),
            hooks: Vec::new(),
        }
    }

    /// Register a cleanup function run when the server stops.
    pub fn on_stop<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.hooks.push((name.into(), Box::new(hook)));
    }

    /// Run every registered hook once. Failures are logged.
    pub fn stop(&mut self) {
        for (name, hook) in self.hooks.drain(..) {
            tracing::debug!(hook = %name, "on_stop call");
            match catch_unwind(AssertUnwindSafe(hook)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(hook = %name, error = %e, "Exception in stop hook"),
                Err(_) => tracing::warn!(hook = %name, "Stop hook panicked"),
            }
        }
    }

    /// Shut a socket down; already closed sockets are fine.
    pub fn close_socket<S: AsFd>(&self, sock: &S) -> io::Result<()> {
        crate::net::close_socket(sock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_hooks_run_once_despite_failures() {
        let mut common = CommonServer::new(&HttpConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        common.on_stop("failing", || Err("nope".into()));
        common.on_stop("panicking", || panic!("boom"));
        common.on_stop("counting", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        common.stop();
        common.stop();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_socket_twice() {
        let common = CommonServer::new(&HttpConfig::default());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        common.close_socket(&client).unwrap();
        common.close_socket(&client).unwrap();
    }
}
