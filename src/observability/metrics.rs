//! Metrics registry
//!
//! Counters only, monotonic, reset on process start. Relaxed atomics; exact
//! cross-counter consistency is not needed.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    layers_created: AtomicU64,
    txns_opened: AtomicU64,
    operations_staged: AtomicU64,
    commits: AtomicU64,
    commits_rejected: AtomicU64,
    operations_applied: AtomicU64,
    reverts: AtomicU64,
    snapshots_persisted: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_layers_created(&self) {
        self.layers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_txns_opened(&self) {
        self.txns_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_operations_staged(&self, count: u64) {
        self.operations_staged.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a successful commit that applied `operations` slots.
    pub fn record_commit(&self, operations: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.operations_applied.fetch_add(operations, Ordering::Relaxed);
    }

    pub fn increment_commits_rejected(&self) {
        self.commits_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reverts(&self) {
        self.reverts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_snapshots_persisted(&self) {
        self.snapshots_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            layers_created: self.layers_created.load(Ordering::Relaxed),
            txns_opened: self.txns_opened.load(Ordering::Relaxed),
            operations_staged: self.operations_staged.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commits_rejected: self.commits_rejected.load(Ordering::Relaxed),
            operations_applied: self.operations_applied.load(Ordering::Relaxed),
            reverts: self.reverts.load(Ordering::Relaxed),
            snapshots_persisted: self.snapshots_persisted.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

/// A point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub layers_created: u64,
    pub txns_opened: u64,
    pub operations_staged: u64,
    pub commits: u64,
    pub commits_rejected: u64,
    pub operations_applied: u64,
    pub reverts: u64,
    pub snapshots_persisted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.commits, 0);
        assert_eq!(snapshot.operations_applied, 0);
    }

    #[test]
    fn test_record_commit() {
        let registry = MetricsRegistry::new();
        registry.record_commit(3);
        registry.record_commit(2);
        registry.increment_commits_rejected();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.commits, 2);
        assert_eq!(snapshot.operations_applied, 5);
        assert_eq!(snapshot.commits_rejected, 1);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.add_operations_staged(4);
        let json = registry.to_json();
        assert_eq!(json["operations_staged"], 4);
        assert_eq!(json["reverts"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_txns_opened();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.snapshot().txns_opened, 800);
    }
}
