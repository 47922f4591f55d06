//! Handle for asking a running server to stop, restart or resize.
//!
//! The server owns its own state; everything else (signal watchers, the dev
//! reload watcher, the `prefork-ctl` binary) holds a `ServerControl` and
//! talks to the server through the same signals an operator would send.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerControl {
    pid: Pid,
}

impl ServerControl {
    /// Control the current process.
    pub fn current() -> Self {
        Self {
            pid: nix::unistd::getpid(),
        }
    }

    pub fn for_pid(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Graceful stop, then re-exec with the same arguments.
    pub fn restart(&self) -> nix::Result<()> {
        self.send(Signal::SIGHUP)
    }

    /// Graceful stop. Sending it twice forces the stop.
    pub fn stop(&self) -> nix::Result<()> {
        self.send(Signal::SIGTERM)
    }

    /// One more HTTP worker.
    pub fn scale_up(&self) -> nix::Result<()> {
        self.send(Signal::SIGTTIN)
    }

    /// One less HTTP worker, never below one.
    pub fn scale_down(&self) -> nix::Result<()> {
        self.send(Signal::SIGTTOU)
    }

    /// Log a dump of threads or workers.
    pub fn dump(&self) -> nix::Result<()> {
        self.send(Signal::SIGQUIT)
    }

    /// Log registry statistics.
    pub fn stats(&self) -> nix::Result<()> {
        self.send(Signal::SIGUSR1)
    }

    pub fn is_running(&self) -> bool {
        match kill(self.pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn send(&self, signal: Signal) -> nix::Result<()> {
        tracing::debug!(pid = self.pid.as_raw(), signal = %signal, "Sending control signal");
        kill(self.pid, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_running() {
        let control = ServerControl::current();
        assert_eq!(control.pid(), std::process::id() as i32);
        assert!(control.is_running());
    }

    #[test]
    fn test_reaped_child_is_not_running() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();

        assert!(!ServerControl::for_pid(pid).is_running());
    }
}
