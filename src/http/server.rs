//! HTTP serving for the three execution models.
//!
//! # Responsibilities
//! - Run the application on a tokio listener until shutdown (threaded, evented)
//! - Serve exactly one connection with hyper (prefork HTTP workers)
//! - Classify client disconnects so workers can ignore them

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    service::TowerToHyperService,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Long-running HTTP server used by the threaded and evented servers.
pub struct HttpServer {
    app: Router,
}

impl HttpServer {
    pub fn new(app: Router) -> Self {
        Self { app }
    }

    /// Serve until `shutdown` fires, then finish in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.app.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Serve one client connection without keep-alive.
pub async fn serve_connection(
    app: Router,
    stream: TcpStream,
    header_timeout: Duration,
) -> Result<(), hyper::Error> {
    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(app);

    hyper::server::conn::http1::Builder::new()
        .keep_alive(false)
        .timer(TokioTimer::new())
        .header_read_timeout(header_timeout)
        .serve_connection(io, service)
        .await
}

/// The client went away while we were answering it.
pub fn is_broken_pipe(err: &hyper::Error) -> bool {
    if err.is_incomplete_message() {
        return true;
    }
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
            ) {
                return true;
            }
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::app::default_application;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_serve_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve_connection(default_application(), stream, Duration::from_secs(2)).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /web/health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"pass\""));
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_graceful_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = broadcast::channel(1);

        let server = tokio::spawn(HttpServer::new(default_application()).run(listener, rx));

        let body = reqwest::get(format!("http://{}/web/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("pass"));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
