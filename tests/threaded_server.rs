//! Threaded server end to end: HTTP thread, cron threads, stop and restart.

mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use prefork_server::http::{default_application, with_request_layers};
use prefork_server::{ExitOutcome, JobRegistry, StaticRegistry, ThreadedServer};
use serde_json::Value;

fn registry() -> Arc<dyn JobRegistry> {
    Arc::new(StaticRegistry::new(vec![]))
}

#[tokio::test]
async fn test_health_endpoint_and_stop() {
    let config = common::test_config(0);
    let mut server = ThreadedServer::new(config, with_request_layers(default_application()), registry());
    server.start(false).unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.stop_handle();
    let serving = thread::spawn(move || server.serve().unwrap());

    let response = reqwest::get(format!("http://{}/web/health", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "pass");

    handle.stop();
    let outcome = tokio::task::spawn_blocking(move || serving.join().unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, ExitOutcome::Stopped);
}

#[test]
fn test_restart_request() {
    let config = common::test_config(0);
    let mut server = ThreadedServer::new(config, default_application(), registry());
    server.start(false).unwrap();
    let handle = server.stop_handle();
    let serving = thread::spawn(move || server.serve().unwrap());

    handle.restart();
    // A second restart while unwinding is ignored.
    handle.restart();
    assert_eq!(serving.join().unwrap(), ExitOutcome::Restart);
}

#[test]
fn test_cron_threads_visit_ready_databases() {
    let mut config = common::test_config(0);
    config.http.enable = false;
    config.workers.max_cron_threads = 1;
    config.cron.sleep_interval_ms = 20;

    let visited = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&visited);
    let registry = StaticRegistry::with_runner(
        vec!["db1".to_string(), "db2".to_string()],
        Arc::new(move |db: &str| {
            log.lock().unwrap().push(db.to_string());
            if db == "db2" {
                Err("job failed".into())
            } else {
                Ok(())
            }
        }),
    );

    let mut server = ThreadedServer::new(config, default_application(), Arc::new(registry));
    server.start(false).unwrap();
    let handle = server.stop_handle();
    let serving = thread::spawn(move || server.serve().unwrap());

    // A failing database does not stop the thread from coming back.
    let seen_twice = common::wait_until(Duration::from_secs(5), || {
        visited.lock().unwrap().iter().filter(|db| *db == "db1").count() >= 2
    });
    handle.stop();
    assert_eq!(serving.join().unwrap(), ExitOutcome::Stopped);

    assert!(seen_twice);
    assert!(visited.lock().unwrap().iter().any(|db| db == "db2"));
}

#[test]
fn test_stop_after_init() {
    let config = common::test_config(0);
    let mut server = ThreadedServer::new(config, default_application(), registry());
    assert_eq!(server.run(true).unwrap(), ExitOutcome::Stopped);
    assert!(server.local_addr().is_none());
}
