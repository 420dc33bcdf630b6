use std::time::Duration;

use anyhow::Result;
use nix::time::{clock_gettime, ClockId};

/// Nanoseconds on the monotonic clock.
///
/// RTT and budget arithmetic must not be skewed by wall-clock steps, so
/// CLOCK_MONOTONIC rather than SystemTime.
pub fn monotonic_ns() -> Result<u64> {
    let now = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
    Ok(Duration::from(now).as_nanos() as u64)
}
