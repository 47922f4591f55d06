//! Preforking HTTP and cron server supervisor.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────── prefork master ────────────────────────┐
//!   signals ─────▶│ SignalQueue ─▶ process_signals ─▶ zombie ─▶ timeout ─▶ spawn     │
//!                 │                                                        │        │
//!                 │   SharedListener ◀── watchdog pipes ◀── sleep(beat) ◀──┘        │
//!                 └──────┬──────────────────────┬────────────────────────┬─────────┘
//!                   fork │                 fork │                   exec │
//!                        ▼                      ▼                        ▼
//!                 ┌─────────────┐        ┌─────────────┐          ┌─────────────┐
//!                 │ WorkerHTTP  │ ...    │ WorkerCron  │ ...      │   evented   │
//!                 │ accept+serve│        │ db rotation │          │ long polling│
//!                 └─────────────┘        └─────────────┘          └─────────────┘
//! ```
//!
//! With `workers = 0` the [`ThreadedServer`] runs HTTP and cron in threads of
//! a single process instead.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod server;
pub mod worker;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult, WorkerError};
pub use lifecycle::ServerControl;
pub use registry::{JobRegistry, StaticRegistry};
pub use server::{EventedServer, ExitOutcome, PreforkServer, StopHandle, ThreadedServer};
