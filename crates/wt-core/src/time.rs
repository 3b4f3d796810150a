//! Time helpers shared across crates

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds.
///
/// # Panics
/// Panics if the system clock is before the Unix epoch, which would indicate
/// a severely misconfigured system.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs()
}
