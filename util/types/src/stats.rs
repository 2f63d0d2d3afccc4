use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Monotonic per-run ingestion counters, plus the current buffer footprint.
///
/// Snapshots handed out by a policy are deep copies taken under the same
/// lock that serializes mutation, so a caller can never observe a torn read
/// and mutating a snapshot never leaks back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStats {
    pub events_received: u64,
    pub events_persisted: u64,
    pub events_dropped: u64,
    pub chunks_received: u64,
    pub chunks_persisted: u64,
    pub error_count: u64,
    pub flush_count: u64,
    /// Current buffered byte estimate; a gauge, not a counter.
    pub buffer_bytes: u64,
    /// Dropped events keyed by event-type name.
    #[serde(default)]
    pub dropped_by_type: BTreeMap<String, u64>,
}

impl PolicyStats {
    /// Records one dropped event of `type_name`.
    pub fn record_drop(&mut self, type_name: &str) {
        self.events_dropped += 1;
        *self.dropped_by_type.entry(type_name.to_owned()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_accounting() {
        let mut stats = PolicyStats::default();
        stats.record_drop("log");
        stats.record_drop("log");
        stats.record_drop("enqueue");
        assert_eq!(stats.events_dropped, 3);
        assert_eq!(stats.dropped_by_type.get("log"), Some(&2));
        assert_eq!(stats.dropped_by_type.get("enqueue"), Some(&1));
    }
}
