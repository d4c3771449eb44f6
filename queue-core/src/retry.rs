//! Backoff arithmetic for the Retry transition.
//!
//! The store performs the actual `run_at` advance server-side (see
//! `store::PgQueueStore::retry`) so the condition and the write stay one
//! atomic round trip. This module is the same formula expressed in Rust, used
//! for previewing a job's next eligible time and for testing backoff
//! monotonicity without a database.

use std::time::Duration;

/// The backoff interval for the first retry.
const BASE_INTERVAL: Duration = Duration::from_secs(60);

/// Attempts beyond this exponent no longer increase the backoff.
const MAX_EXPONENT: u32 = 10;

/// `backoff = 1 minute * 2^min(attempts - 1, 10)`, capped at 1024 minutes by
/// construction (the exponent cap already yields `2^10 == 1024`).
pub fn backoff(attempts: i32) -> Duration {
    let exponent = attempts.saturating_sub(1).max(0) as u32;
    let exponent = exponent.min(MAX_EXPONENT);
    BASE_INTERVAL * 2u32.pow(exponent)
}
