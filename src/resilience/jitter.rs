//! Wake-up spreading for cron pollers.
//!
//! Every poller sleeps a slightly different interval so their wake-ups drift
//! apart over time, and waits a few extra milliseconds after a common wake-up
//! so they do not all hit the database at once.

use std::time::Duration;

/// `base` plus `offset` whole seconds.
pub fn chorus_interval(base: Duration, offset: u64) -> Duration {
    base + Duration::from_secs(offset)
}

/// Sub-100ms delay derived from `seed` (thread number or pid).
pub fn herd_stagger(seed: u64) -> Duration {
    Duration::from_millis(seed.wrapping_mul(10) % 100)
}
