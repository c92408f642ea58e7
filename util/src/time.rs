//! Time helpers. Event timestamps are nanosecond-precision and monotonic
//! within a region (spec.md §3, §5); wall-clock seconds are used for
//! workbase/session bookkeeping.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current wall-clock time in nanoseconds since the Unix epoch, used to
/// stamp events (spec.md §3 Event.timestamp).
pub fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
