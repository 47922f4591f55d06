//! Shared utilities for the integration tests.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use prefork_server::ServerConfig;

/// Configuration that binds to loopback and never touches process limits.
pub fn test_config(port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.http.interface = "127.0.0.1".to_string();
    config.http.port = port;
    config.http.long_polling = false;
    config.workers.max_cron_threads = 0;
    config.limits.limit_memory_soft = 0;
    config.limits.limit_memory_hard = 0;
    config.limits.limit_time_cpu = 0;
    config.server.beat_ms = 50;
    config.server.graceful_timeout_secs = 10;
    config.observability.log_level = "warn".to_string();
    config
}

/// A port nobody listens on right now.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Wait until something accepts connections on `addr`.
pub fn wait_for_port(addr: SocketAddr, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}
