//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)            command line (cli.rs)
//!     → loader.rs (parse)           │
//!     → overrides applied  ◀────────┘
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → handed by value to the selected server
//!
//! With dev_mode = ["reload"]:
//!     watcher.rs detects a change under reload_paths
//!     → ServerControl::restart()
//!     → the server unwinds and the process re-execs with the same arguments
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use cli::{Args, Command};
pub use loader::ConfigError;
pub use schema::{
    CronConfig, HttpConfig, LimitConfig, ObservabilityConfig, ServerConfig, SupervisorConfig,
    WorkerConfig,
};
