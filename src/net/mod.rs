//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! PreforkServer::start
//!     → listener.rs (bind or adopt, SO_REUSEADDR, non-blocking)
//!     → fork: every HTTP worker inherits the same socket
//!     → WorkerHttp polls it and accepts one client at a time
//!
//! ThreadedServer / EventedServer
//!     → tokio listener, requests tracked in connection.rs
//! ```
//!
//! # Design Decisions
//! - One kernel accept queue shared by all workers; the kernel balances
//! - Close is idempotent: EBADF/ENOTCONN are not errors
//! - The socket survives a restart through an exported descriptor

pub mod connection;
pub mod listener;

pub use connection::{close_socket, ActivityKind, ActivityTracker, ConnectionId};
pub use listener::{ListenerError, SharedListener};
