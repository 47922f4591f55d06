//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Threaded / evented:
//!     tokio TcpListener → server.rs HttpServer (axum::serve)
//!         → app.rs layers (request ID, trace, activity tracking)
//!         → application Router
//!
//! Prefork HTTP worker:
//!     accepted client → server.rs serve_connection (hyper http1, no keep-alive)
//!         → app.rs layers → application Router
//! ```

pub mod app;
pub mod server;

pub use app::{default_application, with_activity_tracking, with_request_layers};
pub use server::{is_broken_pipe, serve_connection, HttpServer};
