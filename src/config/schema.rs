//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the supervisor.
//! All types derive Serde traits for deserialization from config files, and
//! serialization for `--save`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the server supervisor.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP service settings (bind interface, ports).
    pub http: HttpConfig,

    /// Worker population settings.
    pub workers: WorkerConfig,

    /// Per-worker resource limits.
    pub limits: LimitConfig,

    /// Scheduled job settings.
    pub cron: CronConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Supervisor loop and process management settings.
    pub server: SupervisorConfig,
}

/// HTTP service configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Serve HTTP at all. Cron-only deployments turn this off.
    pub enable: bool,

    /// Interface to bind (e.g., "0.0.0.0", "::1").
    pub interface: String,

    /// Port of the main HTTP service.
    pub port: u16,

    /// Port of the long-polling (evented) companion process.
    pub gevent_port: u16,

    /// Spawn the long-polling companion process in prefork mode.
    pub long_polling: bool,

    /// Per-operation client socket timeout in HTTP workers, in seconds.
    pub socket_timeout_secs: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interface: "0.0.0.0".to_string(),
            port: 8069,
            gevent_port: 8072,
            long_polling: true,
            socket_timeout_secs: 2.0,
        }
    }
}

impl HttpConfig {
    /// `interface:port` with IPv6 interfaces bracketed.
    pub fn bind_address(&self) -> String {
        format_address(&self.interface, self.port)
    }

    /// `interface:gevent_port` with IPv6 interfaces bracketed.
    pub fn gevent_address(&self) -> String {
        format_address(&self.interface, self.gevent_port)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.socket_timeout_secs.max(0.0))
    }
}

fn format_address(interface: &str, port: u16) -> String {
    if interface.contains(':') {
        format!("[{}]:{}", interface, port)
    } else {
        format!("{}:{}", interface, port)
    }
}

/// Worker population configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of HTTP worker processes. 0 selects the threaded server.
    pub workers: usize,

    /// Number of cron workers (prefork) or cron threads (threaded).
    pub max_cron_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_cron_threads: 2,
        }
    }
}

/// Resource limits applied to every worker.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitConfig {
    /// Requests (HTTP) or database slices (cron) served before a worker recycles.
    pub limit_request: u64,

    /// Virtual memory (bytes) above which a worker recycles after its current request. 0 disables.
    pub limit_memory_soft: u64,

    /// Address space limit (bytes) enforced by the kernel. 0 disables.
    pub limit_memory_hard: u64,

    /// Soft memory limit override for the evented process.
    pub limit_memory_soft_gevent: Option<u64>,

    /// Hard memory limit override for the evented process.
    pub limit_memory_hard_gevent: Option<u64>,

    /// CPU seconds allowed per unit of work. 0 disables.
    pub limit_time_cpu: u64,

    /// Wall-clock seconds allowed per unit of work. 0 disables.
    pub limit_time_real: u64,

    /// Wall-clock seconds for cron work: -1 uses `limit_time_real`, 0 disables.
    pub limit_time_real_cron: i64,

    /// Maximum age in seconds of a cron worker/thread before it is recycled. 0 disables.
    pub limit_time_worker_cron: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            limit_request: 1 << 16,
            limit_memory_soft: 2048 * 1024 * 1024,
            limit_memory_hard: 2560 * 1024 * 1024,
            limit_memory_soft_gevent: None,
            limit_memory_hard_gevent: None,
            limit_time_cpu: 60,
            limit_time_real: 120,
            limit_time_real_cron: -1,
            limit_time_worker_cron: 0,
        }
    }
}

impl LimitConfig {
    /// Watchdog timeout of HTTP workers.
    pub fn http_timeout(&self) -> Option<Duration> {
        (self.limit_time_real > 0).then(|| Duration::from_secs(self.limit_time_real))
    }

    /// Watchdog timeout of cron workers.
    pub fn cron_timeout(&self) -> Option<Duration> {
        match self.limit_time_real_cron {
            -1 => self.http_timeout(),
            secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
            _ => None,
        }
    }

    pub fn cron_max_age(&self) -> Option<Duration> {
        (self.limit_time_worker_cron > 0).then(|| Duration::from_secs(self.limit_time_worker_cron))
    }

    pub fn gevent_memory_soft(&self) -> u64 {
        self.limit_memory_soft_gevent.unwrap_or(self.limit_memory_soft)
    }

    pub fn gevent_memory_hard(&self) -> u64 {
        self.limit_memory_hard_gevent.unwrap_or(self.limit_memory_hard)
    }
}

/// Scheduled job configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CronConfig {
    /// Databases polled for due jobs.
    pub db_name: Vec<String>,

    /// Base polling interval in milliseconds.
    pub sleep_interval_ms: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            db_name: Vec::new(),
            sleep_interval_ms: 60_000,
        }
    }
}

impl CronConfig {
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint (threaded and evented modes).
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Supervisor loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Poll interval of the master and worker loops, in milliseconds.
    pub beat_ms: u64,

    /// How long a graceful stop waits for workers before sending SIGTERM.
    pub graceful_timeout_secs: u64,

    /// Pending signals kept before new ones are dropped (SIGCHLD exempt).
    pub signal_queue_capacity: usize,

    /// Worker exit status that aborts the whole supervisor.
    pub critical_exit_code: i32,

    /// File receiving the supervisor pid.
    pub pidfile: Option<PathBuf>,

    /// Developer features; `reload` restarts the server on file changes.
    pub dev_mode: Vec<String>,

    /// Paths watched by the `reload` developer feature.
    pub reload_paths: Vec<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            beat_ms: 4_000,
            graceful_timeout_secs: 120,
            signal_queue_capacity: 5,
            critical_exit_code: 3,
            pidfile: None,
            dev_mode: Vec::new(),
            reload_paths: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    pub fn beat(&self) -> Duration {
        Duration::from_millis(self.beat_ms)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }

    pub fn dev_reload(&self) -> bool {
        self.dev_mode.iter().any(|mode| mode == "reload" || mode == "all")
    }
}
