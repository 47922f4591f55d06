//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     OS signal → SignalInbox (record + wakeup byte) → SignalQueue
//!     → server loop boundary → SupervisorSignal → action
//!
//! Shutdown (shutdown.rs):
//!     first INT/TERM → graceful unwind (Shutdown / StopFlag)
//!     second INT/TERM → forced exit
//!
//! Restart (control.rs, reexec.rs):
//!     SIGHUP / ServerControl::restart → graceful unwind → re-exec
//! ```
//!
//! # Design Decisions
//! - No global server handle: callers hold a `ServerControl`
//! - Shutdown has timeout: forced exit after deadline
//! - Pid file is a guard removed on drop

pub mod control;
pub mod pidfile;
pub mod reexec;
pub mod shutdown;
pub mod signals;

pub use control::ServerControl;
pub use pidfile::PidFile;
pub use shutdown::{QuitAction, QuitSignals, Shutdown, StopFlag};
pub use signals::{SignalInbox, SignalQueue, SupervisorSignal};
