//! Creation and reaping of child processes.

use std::process::Command;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::error::{ServerError, ServerResult};
use crate::lifecycle::reexec::stripped_args;
use crate::net::SharedListener;
use crate::worker::{run_forked, Worker, WorkerSetup};

/// A child that terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: i32,
    /// Exit status, `None` when killed by a signal.
    pub code: Option<i32>,
}

/// How the prefork master creates, signals and reaps its children.
pub trait ProcessControl {
    /// Start a process running `worker`. Returns its pid.
    fn spawn(&mut self, worker: &Worker, listener: Option<&SharedListener>) -> ServerResult<i32>;

    /// Start the long-polling companion process. Returns its pid.
    fn spawn_long_polling(&mut self) -> ServerResult<i32>;

    fn kill(&mut self, pid: i32, signal: Signal) -> nix::Result<()>;

    /// Reap one terminated child without blocking. `Err(ECHILD)` when there
    /// are no children at all.
    fn try_wait(&mut self) -> nix::Result<Option<ChildExit>>;
}

/// Real processes: `fork` for workers, `exec` for long polling.
pub struct ForkProcessControl {
    setup: WorkerSetup,
}

impl ForkProcessControl {
    pub fn new(setup: WorkerSetup) -> Self {
        Self { setup }
    }
}

impl ProcessControl for ForkProcessControl {
    fn spawn(&mut self, worker: &Worker, listener: Option<&SharedListener>) -> ServerResult<i32> {
        // SAFETY: the child only builds fresh state (runtime, pipes clones,
        // signal handlers) and leaves through process::exit.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(child.as_raw()),
            ForkResult::Child => {
                let code = run_forked(worker, listener, &self.setup);
                std::process::exit(code);
            }
        }
    }

    fn spawn_long_polling(&mut self) -> ServerResult<i32> {
        let exe = std::env::current_exe()?;
        let child = Command::new(exe)
            .args(stripped_args(std::env::args_os()))
            .arg("evented")
            .spawn()
            .map_err(ServerError::Io)?;
        Ok(child.id() as i32)
    }

    fn kill(&mut self, pid: i32, signal: Signal) -> nix::Result<()> {
        kill(Pid::from_raw(pid), signal)
    }

    fn try_wait(&mut self) -> nix::Result<Option<ChildExit>> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG))? {
                WaitStatus::StillAlive => return Ok(None),
                WaitStatus::Exited(pid, code) => {
                    return Ok(Some(ChildExit {
                        pid: pid.as_raw(),
                        code: Some(code),
                    }))
                }
                WaitStatus::Signaled(pid, _, _) => {
                    return Ok(Some(ChildExit {
                        pid: pid.as_raw(),
                        code: None,
                    }))
                }
                _ => continue,
            }
        }
    }
}
