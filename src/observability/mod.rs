//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, worker pid as a span field)
//!     → metrics.rs (counters, gauges)
//!     → proctitle.rs (process name visible in ps/top)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape, threaded and evented modes)
//! ```
//!
//! # Design Decisions
//! - Structured fields instead of formatted messages
//! - Metrics are cheap (atomic increments)
//! - Workers inherit the master's subscriber across fork

pub mod logging;
pub mod metrics;
pub mod proctitle;
