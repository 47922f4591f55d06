//! Database registry seen by the cron machinery.
//!
//! # Responsibilities
//! - List the databases to serve
//! - Tell whether a database is ready for scheduled jobs
//! - Run the jobs that are due in one database
//! - Release per-database resources
//!
//! # Design Decisions
//! - The servers only depend on the `JobRegistry` trait
//! - `StaticRegistry` serves a fixed list and delegates the jobs themselves
//!   to a caller-supplied runner

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Runs the due jobs of one database.
pub type JobRunner = Arc<dyn Fn(&str) -> Result<(), JobError> + Send + Sync>;

pub trait JobRegistry: Send + Sync {
    /// Databases cron should visit.
    fn database_list(&self) -> Vec<String>;

    /// The database exists and its scheduler is installed.
    fn is_ready(&self, db: &str) -> bool;

    /// Run every job due in `db`.
    fn process_jobs(&self, db: &str) -> Result<(), JobError>;

    /// Release connections held for `db`.
    fn close_db(&self, _db: &str) {}

    /// Release everything; called once at server stop.
    fn delete_all(&self) {}

    /// Log cache and registry statistics.
    fn log_stats(&self) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub runs: u64,
    pub failures: u64,
    pub closes: u64,
}

/// Registry over a fixed list of databases.
pub struct StaticRegistry {
    databases: Vec<String>,
    runner: JobRunner,
    stats: Mutex<HashMap<String, DatabaseStats>>,
}

impl StaticRegistry {
    pub fn new(databases: Vec<String>) -> Self {
        Self::with_runner(databases, Arc::new(|db: &str| {
            tracing::debug!(db, "No jobs registered");
            Ok(())
        }))
    }

    pub fn with_runner(databases: Vec<String>, runner: JobRunner) -> Self {
        Self {
            databases,
            runner,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn stats(&self, db: &str) -> DatabaseStats {
        self.lock().get(db).copied().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DatabaseStats>> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobRegistry for StaticRegistry {
    fn database_list(&self) -> Vec<String> {
        self.databases.clone()
    }

    fn is_ready(&self, db: &str) -> bool {
        self.databases.iter().any(|d| d == db)
    }

    fn process_jobs(&self, db: &str) -> Result<(), JobError> {
        let result = (self.runner)(db);
        let mut stats = self.lock();
        let entry = stats.entry(db.to_string()).or_default();
        entry.runs += 1;
        if result.is_err() {
            entry.failures += 1;
        }
        result
    }

    fn close_db(&self, db: &str) {
        self.lock().entry(db.to_string()).or_default().closes += 1;
    }

    fn delete_all(&self) {
        self.lock().clear();
        tracing::debug!("Registry cleared");
    }

    fn log_stats(&self) {
        for (db, stats) in self.lock().iter() {
            tracing::info!(
                db = %db,
                runs = stats.runs,
                failures = stats.failures,
                closes = stats.closes,
                "Registry statistics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_database_is_not_ready() {
        let registry = StaticRegistry::new(vec!["a".into()]);
        assert!(registry.is_ready("a"));
        assert!(!registry.is_ready("b"));
    }

    #[test]
    fn test_runner_failures_are_counted() {
        let registry = StaticRegistry::with_runner(
            vec!["a".into(), "b".into()],
            Arc::new(|db: &str| if db == "b" { Err("boom".into()) } else { Ok(()) }),
        );

        registry.process_jobs("a").unwrap();
        assert!(registry.process_jobs("b").is_err());
        registry.close_db("b");

        assert_eq!(registry.stats("a"), DatabaseStats { runs: 1, failures: 0, closes: 0 });
        assert_eq!(registry.stats("b"), DatabaseStats { runs: 1, failures: 1, closes: 1 });

        registry.delete_all();
        assert_eq!(registry.stats("a"), DatabaseStats::default());
    }
}
