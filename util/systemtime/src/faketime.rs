//! Pinned clock for tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static FAKETIME_ENABLED: AtomicBool = AtomicBool::new(false);
static FAKETIME_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Pins the clock to `millis`; subsequent reads return this value.
pub fn enable(millis: u64) {
    FAKETIME_MILLIS.store(millis, Ordering::SeqCst);
    FAKETIME_ENABLED.store(true, Ordering::SeqCst);
}

/// Unpins the clock.
pub fn disable() {
    FAKETIME_ENABLED.store(false, Ordering::SeqCst);
}

pub(crate) fn unix_time_as_millis() -> u64 {
    if FAKETIME_ENABLED.load(Ordering::SeqCst) {
        FAKETIME_MILLIS.load(Ordering::SeqCst)
    } else {
        super::system_time_as_millis()
    }
}
