//! Long-polling companion server.
//!
//! Spawned by the prefork master with the `evented` subcommand. Serves the
//! application on the gevent port and exits when its parent changes or its
//! memory grows past the soft limit; the master then spawns a new one.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::signal::unix::{signal, SignalKind};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::registry::JobRegistry;
use crate::resilience::limits;
use crate::server::{CommonServer, ExitOutcome};

pub struct EventedServer {
    common: CommonServer,
    config: ServerConfig,
    app: Router,
    registry: Arc<dyn JobRegistry>,
}

impl EventedServer {
    pub fn new(config: ServerConfig, app: Router, registry: Arc<dyn JobRegistry>) -> Self {
        let mut common = CommonServer::new(&config.http);
        common.port = config.http.gevent_port;
        Self {
            common,
            config,
            app,
            registry,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonServer {
        &mut self.common
    }

    pub fn run(mut self) -> ServerResult<ExitOutcome> {
        limits::set_memory_hard_limit(self.config.limits.gevent_memory_hard())?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let result = runtime.block_on(self.serve());

        self.common.stop();
        result.map(|()| ExitOutcome::Stopped)
    }

    async fn serve(&self) -> ServerResult<()> {
        let shutdown = Arc::new(Shutdown::new());
        let receiver = shutdown.subscribe();

        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut user1 = signal(SignalKind::user_defined1())?;

        let listener = tokio::net::TcpListener::bind(self.config.http.gevent_address()).await?;
        tracing::info!(
            address = %listener.local_addr()?,
            "Evented service (longpolling) running"
        );

        let watchdog = tokio::spawn(watchdog(
            Arc::clone(&shutdown),
            self.config.server.beat(),
            self.config.limits.gevent_memory_soft(),
        ));

        let registry = Arc::clone(&self.registry);
        let signals = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = terminate.recv() => break,
                        _ = interrupt.recv() => break,
                        _ = quit.recv() => tracing::info!("Evented server dump requested"),
                        _ = user1.recv() => registry.log_stats(),
                    }
                }
                shutdown.trigger();
            })
        };

        let result = HttpServer::new(self.app.clone()).run(listener, receiver).await;

        watchdog.abort();
        signals.abort();
        result.map_err(Into::into)
    }
}

/// Stop the server when the master goes away or memory runs over.
async fn watchdog(shutdown: Arc<Shutdown>, beat: Duration, memory_soft: u64) {
    let ppid = nix::unistd::getppid();
    let pid = std::process::id();
    let mut interval = tokio::time::interval(beat);

    loop {
        interval.tick().await;

        if nix::unistd::getppid() != ppid {
            tracing::warn!(pid, "Evented server parent changed");
            break;
        }
        if let Some(used) = limits::exceeds_memory_soft(pid, memory_soft) {
            tracing::warn!(pid, memory = used, "Evented server virtual memory limit reached");
            break;
        }
    }
    shutdown.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;

    #[test]
    fn test_listens_on_gevent_port() {
        let mut config = ServerConfig::default();
        config.http.port = 8069;
        config.http.gevent_port = 8072;
        let server = EventedServer::new(config, Router::new(), Arc::new(StaticRegistry::new(vec![])));
        assert_eq!(server.common.port, 8072);
    }

    #[tokio::test]
    async fn test_memory_watchdog_triggers_shutdown() {
        let shutdown = Arc::new(Shutdown::new());
        let mut receiver = shutdown.subscribe();

        tokio::spawn(watchdog(Arc::clone(&shutdown), Duration::from_millis(10), 1));

        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("watchdog never fired")
            .unwrap();
    }
}
