//! Single-process server: one HTTP thread plus a pool of cron threads.
//!
//! The main thread only watches limits. When a request or cron run goes over
//! its wall-clock budget, or the process over its soft memory limit, the
//! server restarts itself once the other requests have drained.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use axum::Router;
use signal_hook::consts::signal::*;
use signal_hook::iterator::{Handle, Signals};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::http::{with_activity_tracking, HttpServer};
use crate::lifecycle::shutdown::{QuitAction, QuitSignals, Shutdown, StopFlag};
use crate::lifecycle::signals::SupervisorSignal;
use crate::net::{ActivityKind, ActivityTracker, ConnectionId};
use crate::observability::metrics;
use crate::registry::JobRegistry;
use crate::resilience::jitter::{chorus_interval, herd_stagger};
use crate::resilience::limits;
use crate::server::{CommonServer, ExitOutcome};

/// How long requests over their limit may wait for the others to finish.
const LIMIT_GRACE: Duration = Duration::from_secs(60);
const LIMIT_RECHECK: Duration = Duration::from_secs(1);
const JOIN_BUDGET: Duration = Duration::from_secs(1);
const JOIN_POLL: Duration = Duration::from_millis(50);

const THREADED_SIGNALS: &[i32] = &[SIGINT, SIGTERM, SIGHUP, SIGXCPU, SIGQUIT, SIGUSR1, SIGUSR2];

/// Asks a running [`ThreadedServer`] to stop or restart, like SIGTERM and
/// SIGHUP would.
#[derive(Clone)]
pub struct StopHandle {
    quit: Arc<QuitSignals>,
    wake: StopFlag,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.quit.on_signal(SupervisorSignal::Stop) == QuitAction::Graceful {
            self.wake.stop();
        }
    }

    pub fn restart(&self) {
        if self.quit.request_restart() == QuitAction::Graceful {
            self.wake.stop();
        }
    }
}

pub struct ThreadedServer {
    common: CommonServer,
    config: Arc<ServerConfig>,
    app: Router,
    registry: Arc<dyn JobRegistry>,
    tracker: ActivityTracker,
    quit: Arc<QuitSignals>,
    /// Wakes the main loop.
    wake: StopFlag,
    cron_stop: StopFlag,
    shutdown: Shutdown,
    local_addr: Option<SocketAddr>,
    http_thread: Option<JoinHandle<()>>,
    cron_threads: Vec<JoinHandle<()>>,
    signal_thread: Option<(Handle, JoinHandle<()>)>,
    limits_reached: HashSet<ConnectionId>,
    memory_exceeded: bool,
    limit_reached_at: Option<Instant>,
}

impl ThreadedServer {
    pub fn new(config: ServerConfig, app: Router, registry: Arc<dyn JobRegistry>) -> Self {
        Self {
            common: CommonServer::new(&config.http),
            config: Arc::new(config),
            app,
            registry,
            tracker: ActivityTracker::new(),
            quit: Arc::new(QuitSignals::new()),
            wake: StopFlag::new(),
            cron_stop: StopFlag::new(),
            shutdown: Shutdown::new(),
            local_addr: None,
            http_thread: None,
            cron_threads: Vec::new(),
            signal_thread: None,
            limits_reached: HashSet::new(),
            memory_exceeded: false,
            limit_reached_at: None,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonServer {
        &mut self.common
    }

    /// Address of the HTTP listener once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            quit: Arc::clone(&self.quit),
            wake: self.wake.clone(),
        }
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    /// Apply the hard memory limit, install signal handlers and start the
    /// HTTP thread.
    pub fn start(&mut self, stop_after_init: bool) -> ServerResult<()> {
        tracing::debug!("Setting signal handlers");
        limits::set_memory_hard_limit(self.config.limits.limit_memory_hard)?;
        self.install_signals()?;

        if !self.config.http.enable || stop_after_init {
            return Ok(());
        }

        let listener = std::net::TcpListener::bind(self.config.http.bind_address())?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);

        let app = with_activity_tracking(self.app.clone(), self.tracker.clone());
        let shutdown = self.shutdown.subscribe();
        let handle = thread::Builder::new()
            .name("http".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to build HTTP runtime");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to register HTTP listener");
                            return;
                        }
                    };
                    if let Err(e) = HttpServer::new(app).run(listener, shutdown).await {
                        tracing::error!(error = %e, "HTTP server failed");
                    }
                });
            })?;
        self.http_thread = Some(handle);
        Ok(())
    }

    fn install_signals(&mut self) -> ServerResult<()> {
        let mut signals = Signals::new(THREADED_SIGNALS)?;
        let handle = signals.handle();
        let quit = Arc::clone(&self.quit);
        let wake = self.wake.clone();
        let tracker = self.tracker.clone();
        let registry = Arc::clone(&self.registry);

        let thread = thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    if sig == SIGXCPU {
                        tracing::error!("CPU time limit exceeded! Shutting down immediately");
                        std::process::exit(0);
                    }
                    match SupervisorSignal::from(sig) {
                        signal @ (SupervisorSignal::Stop | SupervisorSignal::Restart) => {
                            match quit.on_signal(signal) {
                                QuitAction::Graceful => wake.stop(),
                                QuitAction::ForceExit => {
                                    tracing::error!("Forced shutdown.");
                                    std::process::exit(0);
                                }
                                QuitAction::Ignore => {}
                            }
                        }
                        SupervisorSignal::DumpStacks => dump_activities(&tracker, None),
                        SupervisorSignal::DumpStats => registry.log_stats(),
                        _ => {}
                    }
                }
            })?;
        self.signal_thread = Some((handle, thread));
        Ok(())
    }

    /// Start the cron threads and supervise until a stop is requested.
    pub fn serve(&mut self) -> ServerResult<ExitOutcome> {
        self.cron_spawn()?;

        while self.quit.received() == 0 {
            self.process_limit();
            let wait = match self.limit_reached_at {
                Some(since) => {
                    let others_busy = self
                        .tracker
                        .snapshot()
                        .iter()
                        .any(|(id, a)| a.kind == ActivityKind::Http && !self.limits_reached.contains(id));
                    if !others_busy || since.elapsed() > LIMIT_GRACE {
                        tracing::info!("Dumping activities exceeding their limits before reloading");
                        dump_activities(&self.tracker, Some(&self.limits_reached));
                        self.quit.request_restart();
                        break;
                    }
                    LIMIT_RECHECK
                }
                None => self.config.server.beat(),
            };
            if self.wake.wait_timeout(wait) {
                break;
            }
        }

        Ok(self.stop())
    }

    pub fn run(&mut self, stop_after_init: bool) -> ServerResult<ExitOutcome> {
        self.start(stop_after_init)?;
        if stop_after_init {
            return Ok(self.stop());
        }
        self.serve()
    }

    fn cron_spawn(&mut self) -> ServerResult<()> {
        for number in 0..self.config.workers.max_cron_threads {
            let registry = Arc::clone(&self.registry);
            let config = Arc::clone(&self.config);
            let tracker = self.tracker.clone();
            let stop = self.cron_stop.clone();
            let handle = thread::Builder::new()
                .name(format!("cron{}", number))
                .spawn(move || cron_thread(number, registry.as_ref(), &config, &tracker, &stop))?;
            tracing::debug!(thread = number, "Cron thread started");
            self.cron_threads.push(handle);
        }
        Ok(())
    }

    /// Wall-clock budget of one activity.
    fn activity_limit(&self, kind: ActivityKind) -> Option<Duration> {
        let limits = &self.config.limits;
        let secs = match kind {
            ActivityKind::Cron(_) if limits.limit_time_real_cron > 0 => {
                limits.limit_time_real_cron as u64
            }
            _ => limits.limit_time_real,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    fn process_limit(&mut self) {
        if let Some(used) =
            limits::exceeds_memory_soft(std::process::id(), self.config.limits.limit_memory_soft)
        {
            if !self.memory_exceeded {
                tracing::warn!(memory = used, "Server memory limit reached");
            }
            self.memory_exceeded = true;
        }

        let snapshot = self.tracker.snapshot();
        for (id, activity) in &snapshot {
            let Some(limit) = self.activity_limit(activity.kind) else {
                continue;
            };
            let elapsed = activity.elapsed();
            if elapsed > limit && self.limits_reached.insert(*id) {
                tracing::warn!(
                    activity = %id,
                    kind = ?activity.kind,
                    elapsed_secs = elapsed.as_secs(),
                    limit_secs = limit.as_secs(),
                    "Activity virtual real time limit reached"
                );
            }
        }

        // Finished before the restart happened.
        let live: HashSet<ConnectionId> = snapshot.iter().map(|(id, _)| *id).collect();
        self.limits_reached.retain(|id| live.contains(id));

        if self.memory_exceeded || !self.limits_reached.is_empty() {
            self.limit_reached_at.get_or_insert_with(Instant::now);
        } else {
            self.limit_reached_at = None;
        }
    }

    /// Stop serving. Waits up to a second for the HTTP thread.
    pub fn stop(&mut self) -> ExitOutcome {
        let restart = self.quit.restart_requested();
        if restart {
            tracing::info!("Initiating server reload");
        } else {
            tracing::info!("Initiating shutdown");
            tracing::info!("Hit CTRL-C again or send a second signal to force the shutdown.");
        }
        let stop_time = Instant::now();

        self.shutdown.trigger();
        self.cron_stop.stop();
        self.common.stop();

        if let Some(handle) = self.http_thread.take() {
            let stuck = self
                .tracker
                .snapshot()
                .iter()
                .any(|(id, a)| a.kind == ActivityKind::Http && self.limits_reached.contains(id));
            while !stuck && !handle.is_finished() && stop_time.elapsed() < JOIN_BUDGET {
                thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::warn!("HTTP thread panicked");
                }
            } else {
                tracing::debug!("HTTP thread still busy, leaving it behind");
            }
        }

        for handle in self.cron_threads.drain(..) {
            if handle.is_finished() && handle.join().is_err() {
                tracing::warn!("Cron thread panicked");
            }
        }

        self.registry.delete_all();

        for child in limits::child_processes(std::process::id()) {
            tracing::info!(pid = child, "A child process was found, process may hang");
        }

        if let Some((handle, thread)) = self.signal_thread.take() {
            handle.close();
            if thread.join().is_err() {
                tracing::warn!("Signal thread panicked");
            }
        }

        if restart {
            ExitOutcome::Restart
        } else {
            ExitOutcome::Stopped
        }
    }
}

fn cron_thread(
    number: usize,
    registry: &dyn JobRegistry,
    config: &ServerConfig,
    tracker: &ActivityTracker,
    stop: &StopFlag,
) {
    let interval = chorus_interval(config.cron.sleep_interval(), number as u64);
    let stagger = herd_stagger(number as u64);
    let max_age = config.limits.cron_max_age();
    let mut born = Instant::now();

    loop {
        if stop.wait_timeout(interval) || stop.wait_timeout(stagger) {
            break;
        }

        tracing::debug!(thread = number, "Polling for jobs");
        for db in registry.database_list() {
            if stop.is_stopped() {
                return;
            }
            if !registry.is_ready(&db) {
                continue;
            }
            let _activity = tracker.track(ActivityKind::Cron(number));
            let result = registry.process_jobs(&db);
            metrics::record_cron_run(result.is_ok());
            if let Err(e) = result {
                tracing::warn!(thread = number, db = %db, error = %e, "Cron thread encountered an error");
            }
        }

        if let Some(max_age) = max_age {
            if born.elapsed() >= max_age {
                tracing::info!(
                    thread = number,
                    max_age_secs = max_age.as_secs(),
                    "Cron thread max age reached, releasing connections"
                );
                for db in registry.database_list() {
                    registry.close_db(&db);
                }
                born = Instant::now();
            }
        }
    }
    tracing::debug!(thread = number, "Cron thread stopped");
}

fn dump_activities(tracker: &ActivityTracker, only: Option<&HashSet<ConnectionId>>) {
    for (id, activity) in tracker.snapshot() {
        if only.is_some_and(|ids| !ids.contains(&id)) {
            continue;
        }
        tracing::info!(
            activity = %id,
            kind = ?activity.kind,
            elapsed_ms = activity.elapsed().as_millis() as u64,
            "Activity dump"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;

    fn quiet_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.http.enable = false;
        config.workers.max_cron_threads = 0;
        config.limits.limit_memory_soft = 0;
        config.limits.limit_memory_hard = 0;
        config.server.beat_ms = 20;
        config
    }

    fn server(config: ServerConfig) -> ThreadedServer {
        ThreadedServer::new(config, Router::new(), Arc::new(StaticRegistry::new(vec![])))
    }

    #[test]
    fn test_activity_limits() {
        let mut config = quiet_config();
        config.limits.limit_time_real = 10;
        config.limits.limit_time_real_cron = 5;
        let server = server(config);

        assert_eq!(server.activity_limit(ActivityKind::Http), Some(Duration::from_secs(10)));
        assert_eq!(server.activity_limit(ActivityKind::Cron(0)), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_cron_limit_falls_back_to_real_limit() {
        let mut config = quiet_config();
        config.limits.limit_time_real = 10;
        config.limits.limit_time_real_cron = 0;
        let fallback = server(config);
        assert_eq!(fallback.activity_limit(ActivityKind::Cron(1)), Some(Duration::from_secs(10)));

        let mut config = quiet_config();
        config.limits.limit_time_real = 0;
        let unlimited = server(config);
        assert_eq!(unlimited.activity_limit(ActivityKind::Http), None);
    }

    #[test]
    fn test_within_limits_keeps_running() {
        let mut server = server(quiet_config());
        let _activity = server.tracker().track(ActivityKind::Http);
        server.process_limit();
        assert!(server.limit_reached_at.is_none());
        assert!(server.limits_reached.is_empty());
    }

    #[test]
    fn test_soft_memory_limit_triggers_restart() {
        let mut config = quiet_config();
        config.limits.limit_memory_soft = 1;
        let mut server = server(config);

        server.start(false).unwrap();
        let outcome = server.serve().unwrap();
        assert_eq!(outcome, ExitOutcome::Restart);
    }

    #[test]
    fn test_stop_handle_ends_serve() {
        let mut server = server(quiet_config());
        server.start(false).unwrap();
        server.stop_handle().stop();
        assert_eq!(server.serve().unwrap(), ExitOutcome::Stopped);
    }
}
