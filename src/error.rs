//! Error types shared by the servers and workers.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that stop a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket, pipe or thread operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call failed.
    #[error("System call failed: {0}")]
    Os(#[from] nix::errno::Errno),

    /// A worker exited with the critical status; the whole server must stop.
    #[error("Critical worker error (pid {pid}, exit status {status})")]
    CriticalWorker { pid: i32, status: i32 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Errors raised inside a worker loop. Any of them ends the worker with
/// exit status 1; the master replaces it.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// SIGXCPU was delivered.
    #[error("CPU time limit exceeded")]
    CpuLimitExceeded,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Os(#[from] nix::errno::Errno),

    /// The worker could not prepare itself after fork.
    #[error("Worker setup failed: {0}")]
    Setup(String),
}

pub type ServerResult<T> = Result<T, ServerError>;
