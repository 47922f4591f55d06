//! OS signal handling.
//!
//! # Responsibilities
//! - Register the supervisor's signal set (INT, TERM, HUP, CHLD, TTIN, TTOU,
//!   QUIT, USR1, USR2)
//! - Translate signal numbers to internal events
//! - Keep a bounded queue of pending signals for the master loop
//!
//! # Design Decisions
//! - Handlers never make decisions: they record the signal and wake the loop
//! - The queue is bounded; SIGCHLD is exempt so no child goes unreaped
//! - Decisions happen at loop boundaries in the servers

use std::collections::VecDeque;
use std::io;

use nix::sys::signal::Signal;
use signal_hook::consts::signal::*;
use signal_hook::iterator::Signals;

use crate::worker::pipe::Pipe;

/// Signals the prefork master listens to.
pub const SUPERVISOR_SIGNALS: &[i32] = &[
    SIGINT, SIGTERM, SIGHUP, SIGCHLD, SIGTTIN, SIGTTOU, SIGQUIT, SIGUSR1, SIGUSR2,
];

/// What a signal means to a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorSignal {
    /// SIGINT or SIGTERM.
    Stop,
    /// SIGHUP.
    Restart,
    /// SIGCHLD.
    ChildExited,
    /// SIGTTIN.
    IncreasePopulation,
    /// SIGTTOU.
    DecreasePopulation,
    /// SIGQUIT.
    DumpStacks,
    /// SIGUSR1 or SIGUSR2.
    DumpStats,
    Other(i32),
}

impl From<i32> for SupervisorSignal {
    fn from(sig: i32) -> Self {
        match sig {
            SIGINT | SIGTERM => Self::Stop,
            SIGHUP => Self::Restart,
            SIGCHLD => Self::ChildExited,
            SIGTTIN => Self::IncreasePopulation,
            SIGTTOU => Self::DecreasePopulation,
            SIGQUIT => Self::DumpStacks,
            SIGUSR1 | SIGUSR2 => Self::DumpStats,
            other => Self::Other(other),
        }
    }
}

/// Human readable name, e.g. "SIGTERM".
pub fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {}", sig))
}

/// Bounded FIFO of pending signal numbers.
#[derive(Debug)]
pub struct SignalQueue {
    pending: VecDeque<i32>,
    capacity: usize,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queue a signal. Returns false when it was dropped.
    pub fn push(&mut self, sig: i32) -> bool {
        if self.pending.len() < self.capacity || sig == SIGCHLD {
            self.pending.push_back(sig);
            true
        } else {
            tracing::warn!(
                signal = %signal_name(sig),
                pending = self.pending.len(),
                "Dropping signal"
            );
            false
        }
    }

    pub fn pop(&mut self) -> Option<i32> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Installed signal handlers of the prefork master.
///
/// Each delivery is recorded by signal-hook and a byte is written to the
/// master's wakeup pipe so a blocking poll returns early.
pub struct SignalInbox {
    signals: Signals,
}

impl SignalInbox {
    pub fn install(wakeup: &Pipe) -> io::Result<Self> {
        let signals = Signals::new(SUPERVISOR_SIGNALS)?;
        for &sig in SUPERVISOR_SIGNALS {
            signal_hook::low_level::pipe::register(sig, wakeup.writer_clone()?)?;
        }
        Ok(Self { signals })
    }

    /// Move every delivered signal into `queue`.
    pub fn collect_into(&mut self, queue: &mut SignalQueue) {
        for sig in self.signals.pending() {
            queue.push(sig);
        }
    }
}
