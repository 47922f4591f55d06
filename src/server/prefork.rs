//! Prefork master: owns the listening socket and keeps pools of HTTP and
//! cron worker processes at their target size.
//!
//! # Responsibilities
//! - Translate queued signals into stop, restart, resize and dump actions
//! - Reap exited workers; abort on the critical exit status
//! - Kill workers whose watchdog pipe went quiet for too long
//! - Spawn workers until each pool reaches its target
//! - Stop gracefully (SIGINT, wait, SIGTERM) or forcefully (SIGTERM)

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use nix::errno::Errno;
use nix::sys::signal::Signal;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::lifecycle::signals::{signal_name, SignalInbox, SignalQueue, SupervisorSignal};
use crate::net::SharedListener;
use crate::observability::metrics;
use crate::registry::JobRegistry;
use crate::server::process::{ForkProcessControl, ProcessControl};
use crate::server::{CommonServer, ExitOutcome};
use crate::worker::pipe::{poll_readable, Pipe};
use crate::worker::{Worker, WorkerKind, WorkerSetup};

const STOPPING_BEAT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct PreforkServer<P: ProcessControl = ForkProcessControl> {
    common: CommonServer,
    config: Arc<ServerConfig>,
    process: P,
    registry: Arc<dyn JobRegistry>,
    listener: Option<SharedListener>,
    workers_http: HashMap<i32, Worker>,
    workers_cron: HashMap<i32, Worker>,
    /// HTTP workers asked to exit after a population decrease.
    retiring: HashSet<i32>,
    population: usize,
    generation: u64,
    beat: Duration,
    queue: SignalQueue,
    wakeup: Pipe,
    inbox: Option<SignalInbox>,
    long_polling_pid: Option<i32>,
    /// Restart requested.
    phoenix: bool,
}

impl PreforkServer<ForkProcessControl> {
    /// Master that forks real worker processes serving `app`.
    pub fn with_fork(
        config: ServerConfig,
        app: Router,
        registry: Arc<dyn JobRegistry>,
    ) -> ServerResult<Self> {
        let config = Arc::new(config);
        let setup = WorkerSetup {
            config: Arc::clone(&config),
            app,
            registry: Arc::clone(&registry),
        };
        Self::new(config, registry, ForkProcessControl::new(setup))
    }
}

impl<P: ProcessControl> PreforkServer<P> {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<dyn JobRegistry>,
        process: P,
    ) -> ServerResult<Self> {
        Ok(Self {
            common: CommonServer::new(&config.http),
            population: config.workers.workers,
            beat: config.server.beat(),
            queue: SignalQueue::new(config.server.signal_queue_capacity),
            wakeup: Pipe::new()?,
            config,
            process,
            registry,
            listener: None,
            workers_http: HashMap::new(),
            workers_cron: HashMap::new(),
            retiring: HashSet::new(),
            generation: 0,
            inbox: None,
            long_polling_pid: None,
            phoenix: false,
        })
    }

    pub fn common_mut(&mut self) -> &mut CommonServer {
        &mut self.common
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn http_workers(&self) -> usize {
        self.workers_http.len()
    }

    pub fn cron_workers(&self) -> usize {
        self.workers_cron.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(SharedListener::local_addr)
    }

    fn worker_count(&self) -> usize {
        self.workers_http.len() + self.workers_cron.len()
    }

    fn worker_pids(&self) -> Vec<i32> {
        self.workers_http
            .keys()
            .chain(self.workers_cron.keys())
            .copied()
            .collect()
    }

    /// Install signal handlers and bind (or adopt) the listening socket.
    pub fn start(&mut self) -> ServerResult<()> {
        self.inbox = Some(SignalInbox::install(&self.wakeup)?);

        if self.config.http.enable {
            let backlog = (8 * self.population.max(1)).min(i32::MAX as usize) as i32;
            let listener =
                SharedListener::inherited_or_bind(&self.config.http.bind_address(), backlog)
                    .map_err(io::Error::from)?;
            tracing::info!(address = %listener.local_addr(), "HTTP service running");
            self.listener = Some(listener);
        }
        Ok(())
    }

    pub fn run(&mut self, stop_after_init: bool) -> ServerResult<ExitOutcome> {
        self.start()?;

        if stop_after_init {
            self.stop(true)?;
            return Ok(ExitOutcome::Stopped);
        }

        tracing::debug!(population = self.population, "Multiprocess starting");
        loop {
            match self.tick() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    tracing::debug!("Multiprocess clean stop");
                    let restart = self.phoenix;
                    self.stop(true)?;
                    return Ok(if restart {
                        ExitOutcome::Restart
                    } else {
                        ExitOutcome::Stopped
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Supervisor loop failed");
                    if let Err(stop_err) = self.stop(false) {
                        tracing::error!(error = %stop_err, "Forced stop failed");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn tick(&mut self) -> ServerResult<Flow> {
        if self.process_signals() == Flow::Stop {
            return Ok(Flow::Stop);
        }
        self.process_zombie()?;
        self.process_timeout();
        self.process_spawn()?;
        self.sleep()?;
        Ok(Flow::Continue)
    }

    fn process_signals(&mut self) -> Flow {
        if let Some(inbox) = self.inbox.as_mut() {
            inbox.collect_into(&mut self.queue);
        }

        while let Some(sig) = self.queue.pop() {
            tracing::debug!(signal = %signal_name(sig), "Processing signal");
            match SupervisorSignal::from(sig) {
                SupervisorSignal::Stop => return Flow::Stop,
                SupervisorSignal::Restart => {
                    self.phoenix = true;
                    return Flow::Stop;
                }
                SupervisorSignal::DumpStacks => self.dump_workers(),
                SupervisorSignal::DumpStats => self.registry.log_stats(),
                SupervisorSignal::IncreasePopulation => {
                    self.population += 1;
                    tracing::info!(population = self.population, "Worker population increased");
                }
                SupervisorSignal::DecreasePopulation => {
                    if self.population > 1 {
                        self.population -= 1;
                        tracing::info!(population = self.population, "Worker population decreased");
                    } else {
                        tracing::warn!("Worker population already at its minimum");
                    }
                }
                SupervisorSignal::ChildExited | SupervisorSignal::Other(_) => {}
            }
        }
        Flow::Continue
    }

    fn process_zombie(&mut self) -> ServerResult<()> {
        let critical = self.config.server.critical_exit_code;
        loop {
            match self.process.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(exit)) => {
                    if exit.code == Some(critical) {
                        tracing::error!(pid = exit.pid, status = critical, "Critical worker error");
                        return Err(ServerError::CriticalWorker {
                            pid: exit.pid,
                            status: critical,
                        });
                    }
                    metrics::record_worker_reaped();
                    self.worker_pop(exit.pid);
                }
                Err(Errno::ECHILD) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn process_timeout(&mut self) {
        let now = Instant::now();
        let expired: Vec<(i32, WorkerKind, Duration)> = self
            .workers_http
            .values()
            .chain(self.workers_cron.values())
            .filter(|worker| worker.watchdog.is_expired(now))
            .map(|worker| {
                (
                    worker.pid,
                    worker.kind,
                    worker.watchdog.timeout().unwrap_or_default(),
                )
            })
            .collect();

        for (pid, kind, timeout) in expired {
            tracing::error!(
                worker = %kind,
                pid,
                timeout_secs = timeout.as_secs(),
                "Worker timeout"
            );
            metrics::record_worker_timeout(kind.as_str());
            self.worker_kill(pid, Signal::SIGKILL);
        }
    }

    fn process_spawn(&mut self) -> ServerResult<()> {
        if self.config.http.enable {
            while self.workers_http.len() < self.population {
                self.worker_spawn(WorkerKind::Http)?;
            }
            self.retire_surplus_http();

            if self.config.http.long_polling && self.long_polling_pid.is_none() {
                let pid = self.process.spawn_long_polling()?;
                tracing::info!(pid, port = self.config.http.gevent_port, "Long polling process spawned");
                self.long_polling_pid = Some(pid);
            }
        }

        while self.workers_cron.len() < self.config.workers.max_cron_threads {
            self.worker_spawn(WorkerKind::Cron)?;
        }
        Ok(())
    }

    /// After a decrease, ask the newest HTTP workers to finish and exit.
    fn retire_surplus_http(&mut self) {
        let active = self.workers_http.len().saturating_sub(self.retiring.len());
        if active <= self.population {
            return;
        }
        let mut candidates: Vec<(u64, i32)> = self
            .workers_http
            .values()
            .filter(|worker| !self.retiring.contains(&worker.pid))
            .map(|worker| (worker.generation, worker.pid))
            .collect();
        candidates.sort_unstable_by(|a, b| b.cmp(a));

        for (_, pid) in candidates.into_iter().take(active - self.population) {
            tracing::info!(pid, "Retiring HTTP worker");
            self.retiring.insert(pid);
            self.worker_kill(pid, Signal::SIGINT);
        }
    }

    fn worker_spawn(&mut self, kind: WorkerKind) -> ServerResult<i32> {
        self.generation += 1;
        let limits = &self.config.limits;
        let timeout = match kind {
            WorkerKind::Http => limits.http_timeout(),
            WorkerKind::Cron => limits.cron_timeout(),
        };
        let mut worker = Worker::new(kind, self.generation, timeout, limits.limit_request)?;

        let pid = self.process.spawn(&worker, self.listener.as_ref())?;
        worker.pid = pid;
        tracing::debug!(worker = %kind, pid, generation = self.generation, "Worker spawned");
        metrics::record_worker_spawned(kind.as_str());

        match kind {
            WorkerKind::Http => {
                self.workers_http.insert(pid, worker);
                metrics::set_pool_size(kind.as_str(), self.workers_http.len());
            }
            WorkerKind::Cron => {
                self.workers_cron.insert(pid, worker);
                metrics::set_pool_size(kind.as_str(), self.workers_cron.len());
            }
        }
        Ok(pid)
    }

    fn worker_pop(&mut self, pid: i32) {
        if self.long_polling_pid == Some(pid) {
            self.long_polling_pid = None;
        }
        self.retiring.remove(&pid);
        if let Some(worker) = self
            .workers_http
            .remove(&pid)
            .or_else(|| self.workers_cron.remove(&pid))
        {
            tracing::debug!(worker = %worker.kind, pid, "Worker unregistered");
            metrics::set_pool_size(WorkerKind::Http.as_str(), self.workers_http.len());
            metrics::set_pool_size(WorkerKind::Cron.as_str(), self.workers_cron.len());
        }
    }

    fn worker_kill(&mut self, pid: i32, signal: Signal) {
        match self.process.kill(pid, signal) {
            Ok(()) => {
                if signal == Signal::SIGKILL {
                    self.worker_pop(pid);
                }
            }
            Err(Errno::ESRCH) => self.worker_pop(pid),
            Err(e) => tracing::warn!(pid, signal = %signal, error = %e, "Failed to signal worker"),
        }
    }

    /// Wait for pings or wakeups, at most one beat.
    fn sleep(&mut self) -> ServerResult<()> {
        let pinged: Vec<i32> = {
            let workers: Vec<&Worker> = self
                .workers_http
                .values()
                .chain(self.workers_cron.values())
                .collect();
            let mut fds: Vec<_> = workers.iter().map(|w| w.watchdog_pipe.reader()).collect();
            fds.push(self.wakeup.reader());

            let ready = poll_readable(&fds, self.beat)?;

            let mut pinged = Vec::new();
            for (index, is_ready) in ready.into_iter().enumerate() {
                if !is_ready {
                    continue;
                }
                match workers.get(index) {
                    Some(worker) => {
                        worker.watchdog_pipe.drain()?;
                        pinged.push(worker.pid);
                    }
                    None => {
                        self.wakeup.drain()?;
                    }
                }
            }
            pinged
        };

        for pid in pinged {
            if let Some(worker) = self
                .workers_http
                .get_mut(&pid)
                .or_else(|| self.workers_cron.get_mut(&pid))
            {
                worker.watchdog.touch();
            }
        }
        Ok(())
    }

    fn dump_workers(&self) {
        tracing::info!(
            pid = self.common.pid,
            population = self.population,
            long_polling = ?self.long_polling_pid,
            "Supervisor dump"
        );
        for worker in self.workers_http.values().chain(self.workers_cron.values()) {
            tracing::info!(
                worker = %worker.kind,
                pid = worker.pid,
                generation = worker.generation,
                last_seen_ms = worker.watchdog.last_seen().elapsed().as_millis() as u64,
                retiring = self.retiring.contains(&worker.pid),
                "Worker dump"
            );
        }
    }

    fn stop_workers_gracefully(&mut self) {
        tracing::info!("Stopping workers gracefully");

        if let Some(pid) = self.long_polling_pid.take() {
            self.worker_kill(pid, Signal::SIGKILL);
        }

        for pid in self.worker_pids() {
            self.worker_kill(pid, Signal::SIGINT);
        }

        self.beat = STOPPING_BEAT;
        let deadline = Instant::now() + self.config.server.graceful_timeout();
        while self.worker_count() > 0 {
            if self.process_signals() == Flow::Stop {
                tracing::info!("Forced shutdown.");
                break;
            }
            if let Err(e) = self.process_zombie() {
                tracing::warn!(error = %e, "Error while reaping workers");
            }
            if let Err(e) = self.sleep() {
                tracing::warn!(error = %e, "Error while waiting for workers");
            }
            self.process_timeout();
            if Instant::now() >= deadline {
                tracing::warn!(remaining = self.worker_count(), "Graceful timeout reached");
                break;
            }
        }
    }

    /// Stop every worker. A restart keeps the listening socket open for the
    /// next process.
    pub fn stop(&mut self, graceful: bool) -> ServerResult<()> {
        if self.phoenix {
            tracing::info!("Reloading server");
            if let Some(listener) = &self.listener {
                listener.export_for_reexec()?;
            }
            self.stop_workers_gracefully();
            for pid in self.worker_pids() {
                self.worker_kill(pid, Signal::SIGTERM);
            }
            self.common.stop();
            self.registry.delete_all();
            tracing::info!("Old server stopped");
            return Ok(());
        }

        // Workers keep their own copy of the socket.
        drop(self.listener.take());

        if graceful {
            self.common.stop();
            self.stop_workers_gracefully();
        } else {
            tracing::info!("Stopping forcefully");
            if let Some(pid) = self.long_polling_pid.take() {
                self.worker_kill(pid, Signal::SIGKILL);
            }
        }
        for pid in self.worker_pids() {
            self.worker_kill(pid, Signal::SIGTERM);
        }
        self.registry.delete_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;
    use crate::server::process::ChildExit;
    use signal_hook::consts::signal::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeProcess {
        next_pid: i32,
        spawned: Vec<(i32, WorkerKind)>,
        long_polling: Vec<i32>,
        kills: Vec<(i32, Signal)>,
        exits: VecDeque<ChildExit>,
        alive: HashSet<i32>,
        /// Children exit when they receive this signal.
        exit_on: Option<Signal>,
    }

    impl FakeProcess {
        fn new_pid(&mut self) -> i32 {
            self.next_pid += 1;
            let pid = 1000 + self.next_pid;
            self.alive.insert(pid);
            pid
        }

        fn signals_to(&self, pid: i32) -> Vec<Signal> {
            self.kills
                .iter()
                .filter(|(p, _)| *p == pid)
                .map(|(_, s)| *s)
                .collect()
        }
    }

    impl ProcessControl for FakeProcess {
        fn spawn(&mut self, worker: &Worker, _listener: Option<&SharedListener>) -> ServerResult<i32> {
            let pid = self.new_pid();
            self.spawned.push((pid, worker.kind));
            Ok(pid)
        }

        fn spawn_long_polling(&mut self) -> ServerResult<i32> {
            let pid = self.new_pid();
            self.long_polling.push(pid);
            Ok(pid)
        }

        fn kill(&mut self, pid: i32, signal: Signal) -> nix::Result<()> {
            if !self.alive.contains(&pid) {
                return Err(Errno::ESRCH);
            }
            self.kills.push((pid, signal));
            if signal == Signal::SIGKILL || Some(signal) == self.exit_on {
                self.alive.remove(&pid);
                self.exits.push_back(ChildExit { pid, code: None });
            }
            Ok(())
        }

        fn try_wait(&mut self) -> nix::Result<Option<ChildExit>> {
            match self.exits.pop_front() {
                Some(exit) => Ok(Some(exit)),
                None if self.alive.is_empty() => Err(Errno::ECHILD),
                None => Ok(None),
            }
        }
    }

    fn test_config(workers: usize, cron: usize) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.workers.workers = workers;
        config.workers.max_cron_threads = cron;
        config.server.beat_ms = 10;
        config
    }

    fn server(config: ServerConfig, process: FakeProcess) -> PreforkServer<FakeProcess> {
        PreforkServer::new(
            Arc::new(config),
            Arc::new(StaticRegistry::new(vec![])),
            process,
        )
        .unwrap()
    }

    #[test]
    fn test_population_converges() {
        let mut server = server(test_config(3, 2), FakeProcess::default());

        for _ in 0..3 {
            server.process_spawn().unwrap();
        }

        assert_eq!(server.http_workers(), 3);
        assert_eq!(server.cron_workers(), 2);
        assert_eq!(server.process.spawned.len(), 5);
        assert_eq!(server.process.long_polling.len(), 1);
    }

    #[test]
    fn test_http_disabled_spawns_cron_only() {
        let mut config = test_config(3, 1);
        config.http.enable = false;
        let mut server = server(config, FakeProcess::default());

        server.process_spawn().unwrap();

        assert_eq!(server.http_workers(), 0);
        assert_eq!(server.cron_workers(), 1);
        assert!(server.process.long_polling.is_empty());
    }

    #[test]
    fn test_population_signals() {
        let process = FakeProcess {
            exit_on: Some(Signal::SIGINT),
            ..FakeProcess::default()
        };
        let mut server = server(test_config(2, 0), process);
        server.process_spawn().unwrap();

        server.queue.push(SIGTTIN);
        assert_eq!(server.process_signals(), Flow::Continue);
        server.process_spawn().unwrap();
        assert_eq!(server.http_workers(), 3);

        for _ in 0..4 {
            server.queue.push(SIGTTOU);
        }
        server.process_signals();
        assert_eq!(server.population(), 1);

        server.process_spawn().unwrap();
        server.process_zombie().unwrap();
        server.process_spawn().unwrap();
        assert_eq!(server.http_workers(), 1);

        // The oldest worker survives.
        let survivor = *server.workers_http.keys().next().unwrap();
        assert!(server.process.signals_to(survivor).is_empty());
    }

    #[test]
    fn test_signal_queue_overflow() {
        let mut server = server(test_config(1, 0), FakeProcess::default());
        for _ in 0..8 {
            server.queue.push(SIGTTIN);
        }
        server.process_signals();
        assert_eq!(server.population(), 6);
    }

    #[test]
    fn test_hup_requests_restart() {
        let mut server = server(test_config(1, 0), FakeProcess::default());
        server.queue.push(SIGHUP);
        assert_eq!(server.process_signals(), Flow::Stop);
        assert!(server.phoenix);
    }

    #[test]
    fn test_timeout_kills_and_unregisters() {
        let mut config = test_config(2, 0);
        config.limits.limit_time_real = 1;
        let mut server = server(config, FakeProcess::default());
        server.process_spawn().unwrap();

        let stale = *server.workers_http.keys().next().unwrap();
        server
            .workers_http
            .get_mut(&stale)
            .unwrap()
            .watchdog
            .backdate(Duration::from_secs(2));

        server.process_timeout();

        assert_eq!(server.process.signals_to(stale), vec![Signal::SIGKILL]);
        assert!(!server.workers_http.contains_key(&stale));
        assert_eq!(server.http_workers(), 1);

        server.process_zombie().unwrap();
        server.process_spawn().unwrap();
        assert_eq!(server.http_workers(), 2);
    }

    #[test]
    fn test_ping_refreshes_watchdog() {
        let mut config = test_config(1, 0);
        config.limits.limit_time_real = 1;
        config.http.long_polling = false;
        let mut server = server(config, FakeProcess::default());
        server.process_spawn().unwrap();

        let pid = *server.workers_http.keys().next().unwrap();
        let worker = server.workers_http.get_mut(&pid).unwrap();
        worker.watchdog.backdate(Duration::from_secs(2));
        worker.watchdog_pipe.ping().unwrap();

        server.sleep().unwrap();
        server.process_timeout();

        assert!(server.process.kills.is_empty());
        assert_eq!(server.http_workers(), 1);
    }

    #[test]
    fn test_critical_exit_aborts() {
        let mut server = server(test_config(1, 0), FakeProcess::default());
        server.process_spawn().unwrap();
        let pid = *server.workers_http.keys().next().unwrap();
        server.process.exits.push_back(ChildExit { pid, code: Some(3) });

        match server.process_zombie() {
            Err(ServerError::CriticalWorker { pid: failed, status }) => {
                assert_eq!(failed, pid);
                assert_eq!(status, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_ordinary_exit_is_replaced() {
        let mut server = server(test_config(1, 0), FakeProcess::default());
        server.process_spawn().unwrap();
        let pid = *server.workers_http.keys().next().unwrap();
        server.process.alive.remove(&pid);
        server.process.exits.push_back(ChildExit { pid, code: Some(0) });

        server.process_zombie().unwrap();
        assert_eq!(server.http_workers(), 0);

        server.process_spawn().unwrap();
        assert_eq!(server.http_workers(), 1);
        assert_ne!(*server.workers_http.keys().next().unwrap(), pid);
    }

    #[test]
    fn test_no_children_ends_reaping() {
        let mut server = server(test_config(1, 0), FakeProcess::default());
        server.process_zombie().unwrap();
    }

    #[test]
    fn test_graceful_stop_waits_for_workers() {
        let process = FakeProcess {
            exit_on: Some(Signal::SIGINT),
            ..FakeProcess::default()
        };
        let mut server = server(test_config(2, 1), process);
        server.process_spawn().unwrap();
        let long_polling = server.long_polling_pid.unwrap();

        server.stop(true).unwrap();

        assert_eq!(server.worker_count(), 0);
        assert_eq!(server.process.signals_to(long_polling), vec![Signal::SIGKILL]);
        assert!(server
            .process
            .kills
            .iter()
            .all(|(_, s)| *s != Signal::SIGTERM));
    }

    #[test]
    fn test_second_signal_forces_stop() {
        let mut server = server(test_config(2, 1), FakeProcess::default());
        server.process_spawn().unwrap();
        let pids = server.worker_pids();

        server.queue.push(SIGTERM);
        let started = Instant::now();
        server.stop(true).unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        for pid in pids {
            assert_eq!(
                server.process.signals_to(pid),
                vec![Signal::SIGINT, Signal::SIGTERM]
            );
        }
    }

    #[test]
    fn test_restart_terminates_stuck_workers() {
        let mut config = test_config(2, 1);
        config.server.graceful_timeout_secs = 0;
        let mut server = server(config, FakeProcess::default());
        server.process_spawn().unwrap();
        let pids = server.worker_pids();
        server.phoenix = true;

        server.stop(true).unwrap();

        for pid in pids {
            assert_eq!(
                server.process.signals_to(pid),
                vec![Signal::SIGINT, Signal::SIGTERM]
            );
        }
    }

    #[test]
    fn test_restart_exports_listener_and_empties_pool() {
        use crate::net::listener::SOCKET_FD_ENV;
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::fd::AsRawFd;

        let process = FakeProcess {
            exit_on: Some(Signal::SIGINT),
            ..FakeProcess::default()
        };
        let mut server = server(test_config(2, 1), process);
        let listener = SharedListener::bind("127.0.0.1:0", 8).unwrap();
        let fd = listener.as_raw_fd();
        server.listener = Some(listener);
        server.process_spawn().unwrap();

        server.queue.push(SIGHUP);
        assert_eq!(server.process_signals(), Flow::Stop);
        server.stop(true).unwrap();

        assert_eq!(std::env::var(SOCKET_FD_ENV).unwrap(), fd.to_string());
        std::env::remove_var(SOCKET_FD_ENV);
        let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
        assert!(!flags.contains(FdFlag::FD_CLOEXEC));

        assert!(server.local_addr().is_some());
        assert_eq!(server.worker_count(), 0);
        assert!(server.process.alive.is_empty());
    }

    #[test]
    fn test_forced_stop_skips_wait() {
        let mut server = server(test_config(2, 0), FakeProcess::default());
        server.process_spawn().unwrap();
        let pids = server.worker_pids();

        server.stop(false).unwrap();

        for pid in pids {
            assert_eq!(server.process.signals_to(pid), vec![Signal::SIGTERM]);
        }
    }
}
