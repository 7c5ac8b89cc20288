use std::time::{Duration, Instant};

/// Milliseconds elapsed since `since`, saturating rather than panicking if
/// the clock ran backwards (can happen on some VM hosts across a
/// hypervisor-level suspend).
#[must_use]
pub fn elapsed_ms(since: Instant) -> u64 {
	u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[must_use]
pub fn ms(d: Duration) -> u64 { u64::try_from(d.as_millis()).unwrap_or(u64::MAX) }
