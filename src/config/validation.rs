//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (beat > 0, exit codes in range)
//! - Validate addresses and log levels before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use crate::config::schema::ServerConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const DEV_MODES: &[&str] = &["reload", "all"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.http.interface.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "http.interface",
            format!("'{}' is not an IP address", config.http.interface),
        ));
    }
    if !config.http.socket_timeout_secs.is_finite() || config.http.socket_timeout_secs <= 0.0 {
        errors.push(ValidationError::new(
            "http.socket_timeout_secs",
            "must be a positive number",
        ));
    }

    if config.limits.limit_request == 0 {
        errors.push(ValidationError::new("limits.limit_request", "must be greater than 0"));
    }
    if config.limits.limit_time_real_cron < -1 {
        errors.push(ValidationError::new(
            "limits.limit_time_real_cron",
            "must be -1, 0 or a positive number of seconds",
        ));
    }
    let soft = config.limits.limit_memory_soft;
    let hard = config.limits.limit_memory_hard;
    if soft > 0 && hard > 0 && soft > hard {
        errors.push(ValidationError::new(
            "limits.limit_memory_soft",
            format!("soft limit {} exceeds hard limit {}", soft, hard),
        ));
    }

    if config.cron.sleep_interval_ms == 0 {
        errors.push(ValidationError::new("cron.sleep_interval_ms", "must be greater than 0"));
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.server.beat_ms == 0 {
        errors.push(ValidationError::new("server.beat_ms", "must be greater than 0"));
    }
    if config.server.signal_queue_capacity == 0 {
        errors.push(ValidationError::new(
            "server.signal_queue_capacity",
            "must be greater than 0",
        ));
    }
    if !(1..=255).contains(&config.server.critical_exit_code) {
        errors.push(ValidationError::new(
            "server.critical_exit_code",
            "must be an exit status between 1 and 255",
        ));
    }
    for mode in &config.server.dev_mode {
        if !DEV_MODES.contains(&mode.as_str()) {
            errors.push(ValidationError::new(
                "server.dev_mode",
                format!("unknown developer mode '{}'", mode),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
