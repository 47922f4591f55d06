//! Worker processes of the prefork server.
//!
//! # Data Flow
//! ```text
//! master: Worker::new (pipes, watchdog)  ──fork──▶  child: run_forked
//!                                                     → WorkerContext::attach
//!                                                       (pid, title, signals)
//!                                                     → behavior.start
//!                                                     → run_loop:
//!                                                         check_limits
//!                                                         → ping watchdog pipe ──▶ master sleep()
//!                                                         → sleep (poll)
//!                                                         → process_work
//!                                                     → behavior.stop
//!                                                     → exit status
//! ```
//!
//! # Responsibilities
//! - Master-side record of one worker (`Worker`)
//! - Child-side state built after fork (`WorkerContext`)
//! - The shared run loop and the HTTP / cron behaviors
//!
//! # Design Decisions
//! - Nothing worker-local exists before the fork except the pipes
//! - Limits are checked between units of work, never in the middle of one
//! - Any error leaves the loop and the process exits with status 1; the
//!   master replaces it
//! - A worker that cannot even set itself up exits with the critical status
//!   so the master stops instead of respawning it forever

pub mod cron;
pub mod http;
pub mod pipe;
pub mod signals;

use std::fmt;
use std::io;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;

use crate::config::{LimitConfig, ServerConfig};
use crate::error::WorkerError;
use crate::net::SharedListener;
use crate::observability::proctitle;
use crate::registry::JobRegistry;
use crate::resilience::limits;
use crate::resilience::Watchdog;

pub use cron::{DatabaseQueue, WorkerCron};
pub use http::WorkerHttp;
pub use pipe::Pipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Http,
    Cron,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Http => "http",
            WorkerKind::Cron => "cron",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Http => write!(f, "WorkerHTTP"),
            WorkerKind::Cron => write!(f, "WorkerCron"),
        }
    }
}

/// The master's view of one worker.
#[derive(Debug)]
pub struct Worker {
    /// 0 until the process exists.
    pub pid: i32,
    /// Pid of the master that spawned it.
    pub ppid: i32,
    pub kind: WorkerKind,
    pub generation: u64,
    pub watchdog: Watchdog,
    pub watchdog_pipe: Pipe,
    pub wakeup_pipe: Pipe,
    pub request_limit: u64,
}

impl Worker {
    pub fn new(
        kind: WorkerKind,
        generation: u64,
        timeout: Option<Duration>,
        request_limit: u64,
    ) -> io::Result<Self> {
        Ok(Self {
            pid: 0,
            ppid: nix::unistd::getpid().as_raw(),
            kind,
            generation,
            watchdog: Watchdog::new(timeout),
            watchdog_pipe: Pipe::new()?,
            wakeup_pipe: Pipe::new()?,
            request_limit,
        })
    }
}

/// Everything a forked worker needs from its master.
#[derive(Clone)]
pub struct WorkerSetup {
    pub config: Arc<ServerConfig>,
    pub app: Router,
    pub registry: Arc<dyn JobRegistry>,
}

/// State owned by the worker process itself.
pub struct WorkerContext {
    pub kind: WorkerKind,
    pub pid: i32,
    ppid: i32,
    pub request_count: u64,
    pub request_limit: u64,
    alive: bool,
    pub beat: Duration,
    limits: LimitConfig,
    registry: Arc<dyn JobRegistry>,
    watchdog_pipe: Pipe,
    wakeup_pipe: Pipe,
    started: Instant,
}

impl WorkerContext {
    /// Take over `worker` in the freshly forked child.
    pub fn attach(worker: &Worker, setup: &WorkerSetup) -> Result<Self, WorkerError> {
        let pid = nix::unistd::getpid().as_raw();
        let ctx = Self {
            kind: worker.kind,
            pid,
            ppid: worker.ppid,
            request_count: 0,
            request_limit: worker.request_limit,
            alive: true,
            beat: setup.config.server.beat(),
            limits: setup.config.limits.clone(),
            registry: Arc::clone(&setup.registry),
            watchdog_pipe: worker.watchdog_pipe.try_clone()?,
            wakeup_pipe: worker.wakeup_pipe.try_clone()?,
            started: Instant::now(),
        };

        ctx.set_title("");
        signals::install(ctx.wakeup_pipe.writer_fd())
            .map_err(|e| WorkerError::Setup(format!("signal handlers: {}", e)))?;
        tracing::info!(worker = %ctx.kind, "Worker alive");
        Ok(ctx)
    }

    #[cfg(test)]
    pub(crate) fn for_test(kind: WorkerKind, registry: Arc<dyn JobRegistry>, limits: LimitConfig) -> Self {
        Self {
            kind,
            pid: nix::unistd::getpid().as_raw(),
            ppid: nix::unistd::getppid().as_raw(),
            request_count: 0,
            request_limit: limits.limit_request,
            alive: true,
            beat: Duration::from_millis(10),
            limits,
            registry,
            watchdog_pipe: Pipe::new().unwrap(),
            wakeup_pipe: Pipe::new().unwrap(),
            started: Instant::now(),
        }
    }

    pub fn set_title(&self, detail: &str) {
        let title = if detail.is_empty() {
            format!("{} {}", self.kind, self.pid)
        } else {
            format!("{} {} {}", self.kind, self.pid, detail)
        };
        proctitle::set_title(&title);
    }

    pub fn is_alive(&self) -> bool {
        self.alive && !signals::stop_requested()
    }

    /// Finish the current unit of work, then exit.
    pub fn retire(&mut self) {
        self.alive = false;
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn registry(&self) -> &Arc<dyn JobRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &LimitConfig {
        &self.limits
    }

    pub fn wakeup(&self) -> BorrowedFd<'_> {
        self.wakeup_pipe.reader()
    }

    pub fn drain_wakeup(&self) -> io::Result<()> {
        self.wakeup_pipe.drain().map(|_| ())
    }

    pub fn ping_watchdog(&self) -> io::Result<()> {
        self.watchdog_pipe.ping()
    }

    /// Retire when over a limit and re-arm the kernel limits for the next
    /// unit of work.
    pub fn check_limits(&mut self) -> Result<(), WorkerError> {
        if nix::unistd::getppid().as_raw() != self.ppid {
            tracing::info!(worker = %self.kind, "Parent changed");
            self.retire();
        }

        if self.request_count >= self.request_limit {
            tracing::info!(
                worker = %self.kind,
                request_count = self.request_count,
                "Max request reached"
            );
            self.retire();
        }

        if let Some(used) = limits::exceeds_memory_soft(self.pid as u32, self.limits.limit_memory_soft) {
            tracing::info!(
                worker = %self.kind,
                memory = used,
                limit = self.limits.limit_memory_soft,
                "Virtual memory limit reached"
            );
            self.retire();
        }

        limits::set_memory_hard_limit(self.limits.limit_memory_hard)?;
        limits::reset_cpu_limit(self.limits.limit_time_cpu)?;
        Ok(())
    }

    /// Serve dump and statistics requests delivered by signal.
    fn service_signal_requests(&self) {
        if signals::take_dump_request() {
            tracing::info!(
                worker = %self.kind,
                request_count = self.request_count,
                request_limit = self.request_limit,
                age_secs = self.age().as_secs(),
                "Worker dump"
            );
        }
        if signals::take_stats_request() {
            self.registry.log_stats();
        }
    }

    fn ensure_cpu_budget(&self) -> Result<(), WorkerError> {
        if signals::cpu_exceeded() {
            tracing::info!(
                worker = %self.kind,
                limit = self.limits.limit_time_cpu,
                "CPU time limit reached"
            );
            return Err(WorkerError::CpuLimitExceeded);
        }
        Ok(())
    }
}

/// What distinguishes one kind of worker from another.
pub trait WorkerBehavior {
    fn start(&mut self, _ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Wait for work, at most one beat (or longer for cron).
    fn sleep(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError>;

    fn check_limits(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        ctx.check_limits()
    }

    fn process_work(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError>;

    fn stop(&mut self, _ctx: &mut WorkerContext) {}
}

/// Loop until the worker retires or an error occurs.
pub fn run_loop<B: WorkerBehavior + ?Sized>(
    behavior: &mut B,
    ctx: &mut WorkerContext,
) -> Result<(), WorkerError> {
    while ctx.is_alive() {
        behavior.check_limits(ctx)?;
        ctx.ping_watchdog()?;
        behavior.sleep(ctx)?;
        ctx.ensure_cpu_budget()?;
        ctx.service_signal_requests();
        if !ctx.is_alive() {
            break;
        }
        behavior.process_work(ctx)?;
        ctx.ensure_cpu_budget()?;
    }
    Ok(())
}

fn run<B: WorkerBehavior + ?Sized>(behavior: &mut B, ctx: &mut WorkerContext) -> Result<(), WorkerError> {
    behavior.start(ctx)?;
    let result = run_loop(behavior, ctx);
    behavior.stop(ctx);
    result
}

/// Body of a forked worker. Returns the process exit status.
pub fn run_forked(worker: &Worker, listener: Option<&SharedListener>, setup: &WorkerSetup) -> i32 {
    let critical = setup.config.server.critical_exit_code;
    let pid = nix::unistd::getpid().as_raw();
    let _span = tracing::info_span!("worker", pid, kind = worker.kind.as_str()).entered();

    let mut ctx = match WorkerContext::attach(worker, setup) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "Worker setup failed");
            return critical;
        }
    };

    let result = match worker.kind {
        WorkerKind::Http => match listener {
            Some(listener) => {
                let timeout = http::socket_timeout(setup.config.http.socket_timeout());
                match WorkerHttp::new(listener, setup.app.clone(), timeout) {
                    Ok(mut behavior) => run(&mut behavior, &mut ctx),
                    Err(e) => {
                        tracing::error!(error = %e, "Worker setup failed");
                        return critical;
                    }
                }
            }
            None => {
                tracing::error!("HTTP worker started without a listening socket");
                return critical;
            }
        },
        WorkerKind::Cron => {
            let mut behavior = WorkerCron::new(
                Arc::clone(&setup.registry),
                setup.config.cron.sleep_interval(),
                setup.config.limits.cron_max_age(),
                listener,
            );
            run(&mut behavior, &mut ctx)
        }
    };

    match result {
        Ok(()) => {
            tracing::info!(
                worker = %ctx.kind,
                request_count = ctx.request_count,
                "Worker exiting"
            );
            0
        }
        Err(e) => {
            tracing::error!(worker = %ctx.kind, error = %e, "Exception occurred, exiting");
            1
        }
    }
}
