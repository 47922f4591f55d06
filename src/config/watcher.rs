//! Source watcher for the `reload` developer mode.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::lifecycle::ServerControl;

/// Restarts the server once when a watched file changes.
pub struct ReloadWatcher {
    paths: Vec<PathBuf>,
    control: ServerControl,
}

impl ReloadWatcher {
    pub fn new(paths: Vec<PathBuf>, control: ServerControl) -> Self {
        Self { paths, control }
    }

    /// Start watching in notify's background thread.
    ///
    /// The returned watcher must be kept alive for as long as watching should
    /// continue.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let control = self.control;
        let fired = Arc::new(AtomicBool::new(false));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                        return;
                    }
                    if fired.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    tracing::info!(paths = ?event.paths, "File change detected, restarting server");
                    if let Err(e) = control.restart() {
                        tracing::error!(error = %e, "Failed to request restart");
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for path in &self.paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
        }

        tracing::info!(paths = ?self.paths, "Reload watcher started");
        Ok(watcher)
    }
}
