//! Scheduled job worker.
//!
//! Each unit of work handles a single database. The worker only really
//! sleeps once every database of the current round has been visited.

use std::collections::VecDeque;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;

use crate::error::WorkerError;
use crate::net::SharedListener;
use crate::observability::metrics;
use crate::registry::JobRegistry;
use crate::resilience::jitter::{chorus_interval, herd_stagger};
use crate::worker::pipe::poll_readable;
use crate::worker::{WorkerBehavior, WorkerContext};

/// Databases left to visit in the current round, in order.
#[derive(Debug, Default)]
pub struct DatabaseQueue {
    queue: VecDeque<String>,
    count: usize,
}

impl DatabaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new round. Returns the number of databases in it.
    pub fn refill<I: IntoIterator<Item = String>>(&mut self, databases: I) -> usize {
        self.queue = databases.into_iter().collect();
        self.count = self.queue.len();
        self.count
    }

    pub fn pop(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Size of the current round.
    pub fn count(&self) -> usize {
        self.count
    }
}

pub struct WorkerCron<'a> {
    registry: Arc<dyn JobRegistry>,
    queue: DatabaseQueue,
    sleep_interval: Duration,
    max_age: Option<Duration>,
    inherited_listener: Option<&'a SharedListener>,
}

impl<'a> WorkerCron<'a> {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        sleep_interval: Duration,
        max_age: Option<Duration>,
        inherited_listener: Option<&'a SharedListener>,
    ) -> Self {
        Self {
            registry,
            queue: DatabaseQueue::new(),
            sleep_interval,
            max_age,
            inherited_listener,
        }
    }
}

impl WorkerBehavior for WorkerCron<'_> {
    fn start(&mut self, _ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        Errno::clear();
        // SAFETY: nice(2) has no memory-safety preconditions.
        let niced = unsafe { nix::libc::nice(10) };
        if niced == -1 && Errno::last() != Errno::UnknownErrno {
            tracing::warn!(error = %Errno::last(), "Could not lower priority");
        }

        // Cron never accepts. The master's handle to the socket is never
        // dropped in this process, so closing the descriptor here is the only
        // close it gets.
        if let Some(listener) = self.inherited_listener.take() {
            nix::unistd::close(listener.as_raw_fd())?;
        }
        Ok(())
    }

    fn sleep(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        if !self.queue.is_empty() {
            return Ok(());
        }
        let seed = ctx.pid.unsigned_abs() as u64;
        let interval = chorus_interval(self.sleep_interval, seed % 10);
        poll_readable(&[ctx.wakeup()], interval)?;
        std::thread::sleep(herd_stagger(seed));
        ctx.drain_wakeup()?;
        Ok(())
    }

    fn check_limits(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        ctx.check_limits()?;
        if let Some(max_age) = self.max_age {
            if ctx.age() > max_age {
                tracing::info!(
                    worker = %ctx.kind,
                    max_age_secs = max_age.as_secs(),
                    "Max age reached"
                );
                ctx.retire();
            }
        }
        Ok(())
    }

    fn process_work(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        tracing::debug!(worker = %ctx.kind, "Polling for jobs");

        if self.queue.is_empty() {
            let registry = Arc::clone(&self.registry);
            let ready = registry
                .database_list()
                .into_iter()
                .filter(|db| registry.is_ready(db));
            if self.queue.refill(ready) == 0 {
                return Ok(());
            }
        }

        let Some(db) = self.queue.pop() else {
            return Ok(());
        };
        ctx.set_title(&db);

        let result = self.registry.process_jobs(&db);
        metrics::record_cron_run(result.is_ok());
        if let Err(e) = result {
            tracing::error!(db = %db, error = %e, "Scheduled jobs failed");
        }

        // Only keep connections around when serving a single database.
        let count = self.queue.count();
        if count > 1 {
            self.registry.close_db(&db);
        }

        ctx.request_count += 1;
        if ctx.request_count >= ctx.request_limit && (ctx.request_limit as usize) < count {
            tracing::error!(
                extra = count - ctx.request_limit as usize,
                "There are more databases to process than allowed by limit_request"
            );
        }
        Ok(())
    }
}
