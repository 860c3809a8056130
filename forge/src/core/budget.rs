//! Shared time budget helpers for bounded orchestration.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("step budget exhausted"));
    }
    Ok(remaining)
}

/// Deadline `budget` after `start`, or an error when it is not representable.
pub fn deadline_after(start: Instant, budget: Duration) -> Result<Instant> {
    start
        .checked_add(budget)
        .ok_or_else(|| anyhow!("time budget of {}s is too large", budget.as_secs()))
}

/// Shorten `timeout` so it never runs past `deadline`.
pub fn clamp_to_deadline(timeout: Duration, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO);
            timeout.min(remaining)
        }
        None => timeout,
    }
}

/// Whether a single step's wall-clock time breaks the per-step ceiling.
pub fn exceeds_ceiling(elapsed: Duration, ceiling: Duration) -> bool {
    elapsed > ceiling
}
