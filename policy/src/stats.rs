use parking_lot::Mutex;

use quarry_types::PolicyStats;

/// Shared counter cell. Every mutation and every snapshot goes through the
/// one lock, so snapshots are never torn and stay isolated deep copies.
#[derive(Default)]
pub(crate) struct StatsCell {
    inner: Mutex<PolicyStats>,
}

impl StatsCell {
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut PolicyStats) -> R) -> R {
        let mut stats = self.inner.lock();
        f(&mut stats)
    }

    pub(crate) fn snapshot(&self) -> PolicyStats {
        self.inner.lock().clone()
    }
}
