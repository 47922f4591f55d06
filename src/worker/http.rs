//! HTTP request worker.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsFd;
use std::time::Duration;

use axum::Router;
use tokio::runtime::Runtime;

use crate::error::WorkerError;
use crate::http::{is_broken_pipe, serve_connection};
use crate::net::SharedListener;
use crate::worker::pipe::{poll_readable, set_cloexec};
use crate::worker::{WorkerBehavior, WorkerContext};

/// Overrides the configured client socket timeout, in seconds.
pub const SOCKET_TIMEOUT_ENV: &str = "PREFORK_HTTP_SOCKET_TIMEOUT";

/// Client socket timeout: the environment wins over `default`.
pub fn socket_timeout(default: Duration) -> Duration {
    std::env::var(SOCKET_TIMEOUT_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

/// Accepts clients on the shared socket and serves one request each.
pub struct WorkerHttp<'a> {
    listener: &'a SharedListener,
    app: Router,
    runtime: Runtime,
    socket_timeout: Duration,
}

impl<'a> WorkerHttp<'a> {
    pub fn new(listener: &'a SharedListener, app: Router, socket_timeout: Duration) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            listener,
            app,
            runtime,
            socket_timeout,
        })
    }

    fn process_request(
        &mut self,
        ctx: &mut WorkerContext,
        client: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), WorkerError> {
        client.set_nodelay(true)?;
        set_cloexec(&client)?;
        client.set_nonblocking(true)?;

        let app = self.app.clone();
        let timeout = self.socket_timeout;
        let served = self.runtime.block_on(async move {
            let stream = tokio::net::TcpStream::from_std(client)?;
            Ok::<_, io::Error>(serve_connection(app, stream, timeout).await)
        })?;

        match served {
            Ok(()) => {}
            Err(e) if is_broken_pipe(&e) => {
                tracing::debug!(peer = %peer, "Client closed the connection early");
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Error while serving request");
            }
        }

        ctx.request_count += 1;
        Ok(())
    }
}

impl WorkerBehavior for WorkerHttp<'_> {
    fn sleep(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        poll_readable(&[self.listener.as_fd(), ctx.wakeup()], ctx.beat)?;
        ctx.drain_wakeup()?;
        Ok(())
    }

    fn process_work(&mut self, ctx: &mut WorkerContext) -> Result<(), WorkerError> {
        match self.listener.accept()? {
            Some((client, peer)) => self.process_request(ctx, client, peer),
            None => Ok(()),
        }
    }
}
