//! Command-line interface of the server binary.
//!
//! Flags override the values read from the TOML file; the merged result is
//! validated once.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::loader::{read_config, save_config, ConfigError};
use crate::config::schema::ServerConfig;
use crate::config::validation::validate_config;

/// File written by `--save` when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "prefork-server.toml";

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "prefork-server")]
#[command(about = "Threaded and prefork HTTP/cron server supervisor", long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface the HTTP service binds to
    #[arg(long)]
    pub http_interface: Option<String>,

    /// Port of the HTTP service
    #[arg(short = 'p', long)]
    pub http_port: Option<u16>,

    /// Port of the long-polling process
    #[arg(long)]
    pub gevent_port: Option<u16>,

    /// Disable the HTTP service (cron only)
    #[arg(long)]
    pub no_http: bool,

    /// Number of HTTP worker processes; 0 runs the threaded server
    #[arg(long)]
    pub workers: Option<usize>,

    /// Number of cron workers or threads
    #[arg(long)]
    pub max_cron_threads: Option<usize>,

    #[arg(long)]
    pub limit_request: Option<u64>,

    #[arg(long)]
    pub limit_memory_soft: Option<u64>,

    #[arg(long)]
    pub limit_memory_hard: Option<u64>,

    #[arg(long)]
    pub limit_time_cpu: Option<u64>,

    #[arg(long)]
    pub limit_time_real: Option<u64>,

    /// -1 uses --limit-time-real, 0 disables
    #[arg(long, allow_negative_numbers = true)]
    pub limit_time_real_cron: Option<i64>,

    #[arg(long)]
    pub limit_time_worker_cron: Option<u64>,

    /// Databases served by cron (comma separated)
    #[arg(short = 'd', long = "database", value_delimiter = ',')]
    pub database: Vec<String>,

    /// File receiving the supervisor pid
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// Developer features (comma separated): reload, all
    #[arg(long, value_delimiter = ',')]
    pub dev: Vec<String>,

    #[arg(long)]
    pub log_level: Option<String>,

    /// Start the server, run one initialisation pass, then exit
    #[arg(long)]
    pub stop_after_init: bool,

    /// Save the effective configuration and continue
    #[arg(short, long)]
    pub save: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the long-polling (evented) server
    Evented,
}

impl Args {
    pub fn is_evented(&self) -> bool {
        self.command == Some(Command::Evented)
    }

    /// Path used by `--save`.
    pub fn save_path(&self) -> &Path {
        self.config
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Copy every flag that was given onto `config`.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(interface) = &self.http_interface {
            config.http.interface = interface.clone();
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }
        if let Some(port) = self.gevent_port {
            config.http.gevent_port = port;
        }
        if self.no_http {
            config.http.enable = false;
        }
        if let Some(workers) = self.workers {
            config.workers.workers = workers;
        }
        if let Some(threads) = self.max_cron_threads {
            config.workers.max_cron_threads = threads;
        }

        let limits = &mut config.limits;
        if let Some(v) = self.limit_request {
            limits.limit_request = v;
        }
        if let Some(v) = self.limit_memory_soft {
            limits.limit_memory_soft = v;
        }
        if let Some(v) = self.limit_memory_hard {
            limits.limit_memory_hard = v;
        }
        if let Some(v) = self.limit_time_cpu {
            limits.limit_time_cpu = v;
        }
        if let Some(v) = self.limit_time_real {
            limits.limit_time_real = v;
        }
        if let Some(v) = self.limit_time_real_cron {
            limits.limit_time_real_cron = v;
        }
        if let Some(v) = self.limit_time_worker_cron {
            limits.limit_time_worker_cron = v;
        }

        if !self.database.is_empty() {
            config.cron.db_name = self.database.clone();
        }
        if let Some(pidfile) = &self.pidfile {
            config.server.pidfile = Some(pidfile.clone());
        }
        if !self.dev.is_empty() {
            config.server.dev_mode = self.dev.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

/// Build the effective configuration: file (or defaults), then flags, then
/// validation. `--save` writes the result back.
pub fn load(args: &Args) -> Result<ServerConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) if path.exists() || !args.save => read_config(path)?,
        _ => ServerConfig::default(),
    };
    args.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    if args.save {
        save_config(&config, args.save_path())?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "prefork-server",
            "--workers",
            "4",
            "-p",
            "9000",
            "--limit-time-real-cron",
            "-1",
            "-d",
            "a,b",
            "--dev",
            "reload",
        ]);
        let config = load(&args).unwrap();

        assert_eq!(config.workers.workers, 4);
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.limits.limit_time_real_cron, -1);
        assert_eq!(config.cron.db_name, vec!["a".to_string(), "b".to_string()]);
        assert!(config.server.dev_reload());
    }

    #[test]
    fn test_evented_subcommand() {
        let args = Args::parse_from(["prefork-server", "--no-http", "evented"]);
        assert!(args.is_evented());
        assert!(args.no_http);
    }

    #[test]
    fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let args = Args::parse_from([
            "prefork-server",
            "--config",
            path.to_str().unwrap(),
            "--workers",
            "2",
            "--save",
        ]);

        let config = load(&args).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        let reloaded: ServerConfig = toml::from_str(&saved).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.workers.workers, 2);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = Args::parse_from(["prefork-server", "--http-interface", "not-an-ip"]);
        assert!(matches!(load(&args), Err(ConfigError::Validation(_))));
    }
}
