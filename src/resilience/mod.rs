//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Worker loop (child process):
//!     → limits.rs (memory soft limit, RLIMIT_AS, RLIMIT_CPU per unit of work)
//!     → watchdog pipe ping
//!
//! Master loop:
//!     → watchdog.rs (last ping older than timeout → SIGKILL)
//!
//! Cron:
//!     → jitter.rs (spread wake-ups on the timeline)
//! ```
//!
//! # Design Decisions
//! - Two timeout classes: wall clock (master kills) and CPU (kernel signals)
//! - A worker over its soft limits finishes the current unit of work first
//! - Limits set to 0 are disabled

pub mod jitter;
pub mod limits;
pub mod watchdog;

pub use watchdog::Watchdog;
