//! Server entry point.
//!
//! Picks the execution model from the configuration: the evented companion
//! when started with `evented`, the threaded server for `workers = 0`, the
//! prefork master otherwise. A restart request re-executes the binary.
//!
//! `main` stays synchronous: the prefork master forks, and each server builds
//! the runtimes it needs after that point.

use std::sync::Arc;

use clap::Parser;

use prefork_server::config::{self, watcher::ReloadWatcher, Args, ServerConfig};
use prefork_server::http::{default_application, with_request_layers};
use prefork_server::lifecycle::{reexec::reexec, PidFile, ServerControl};
use prefork_server::observability::{logging::init_logging, metrics::init_metrics};
use prefork_server::{
    EventedServer, ExitOutcome, JobRegistry, PreforkServer, ServerResult, StaticRegistry,
    ThreadedServer,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = config::cli::load(&args)?;
    init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.workers.workers,
        max_cron_threads = config.workers.max_cron_threads,
        "prefork-server starting"
    );
    if args.save {
        tracing::info!(path = %args.save_path().display(), "Configuration saved");
    }

    let registry: Arc<dyn JobRegistry> = Arc::new(StaticRegistry::new(config.cron.db_name.clone()));
    let app = with_request_layers(default_application());

    if args.is_evented() {
        start_metrics(&config);
        EventedServer::new(config, app, registry).run()?;
        return Ok(());
    }

    let _pidfile = match &config.server.pidfile {
        Some(path) => Some(PidFile::create(path)?),
        None => None,
    };
    let _watcher = if config.server.dev_reload() {
        Some(ReloadWatcher::new(config.server.reload_paths.clone(), ServerControl::current()).run()?)
    } else {
        None
    };

    match run_server(config, app, registry, args.stop_after_init) {
        Ok(ExitOutcome::Stopped) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        // exec keeps the pid, so the pid file guard must not run first.
        Ok(ExitOutcome::Restart) => Err(reexec().into()),
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            Err(e.into())
        }
    }
}

fn run_server(
    config: ServerConfig,
    app: axum::Router,
    registry: Arc<dyn JobRegistry>,
    stop_after_init: bool,
) -> ServerResult<ExitOutcome> {
    if config.workers.workers == 0 {
        start_metrics(&config);
        ThreadedServer::new(config, app, registry).run(stop_after_init)
    } else {
        PreforkServer::with_fork(config, app, registry)?.run(stop_after_init)
    }
}

fn start_metrics(config: &ServerConfig) {
    if !config.observability.metrics_enabled {
        return;
    }
    match config.observability.metrics_address.parse() {
        Ok(addr) => init_metrics(addr),
        Err(_) => tracing::error!(
            metrics_address = %config.observability.metrics_address,
            "Failed to parse metrics address"
        ),
    }
}
