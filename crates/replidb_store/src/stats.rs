//! Store statistics.
//!
//! Counters are atomic and can be read while transactions are in progress.
//! The testkit and the benchmarks use them to check how many transactions a
//! replay opened and how many of them conflicted.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live store counters.
#[derive(Debug, Default)]
pub struct StoreStats {
    // Connection counters
    connections_opened: AtomicU64,
    connections_open: AtomicU64,

    // Transaction counters
    write_transactions: AtomicU64,
    exclusive_transactions: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    write_conflicts: AtomicU64,

    // Document counters
    inserts: AtomicU64,
    upserts: AtomicU64,
    deletes: AtomicU64,
    finds: AtomicU64,
}

impl StoreStats {
    /// Creates a zeroed stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_connection_open(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.connections_open.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_close(&self) {
        self.connections_open.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self, exclusive: bool) {
        if exclusive {
            self.exclusive_transactions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write_transactions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_conflict(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upsert(&self) {
        self.upserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_find(&self) {
        self.finds.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of connections currently open.
    pub fn connections_open(&self) -> u64 {
        self.connections_open.load(Ordering::Relaxed)
    }

    /// Returns the number of successful commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of write conflicts reported at commit.
    pub fn write_conflicts(&self) -> u64 {
        self.write_conflicts.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            write_transactions: self.write_transactions.load(Ordering::Relaxed),
            exclusive_transactions: self.exclusive_transactions.load(Ordering::Relaxed),
            commits: self.commits(),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts(),
            inserts: self.inserts.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            finds: self.finds.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Connections opened since start.
    pub connections_opened: u64,
    /// Non-exclusive write transactions opened.
    pub write_transactions: u64,
    /// Exclusive write transactions opened.
    pub exclusive_transactions: u64,
    /// Successful commits.
    pub commits: u64,
    /// Transactions rolled back, explicitly or on drop.
    pub rollbacks: u64,
    /// Commits refused because of a concurrent write.
    pub write_conflicts: u64,
    /// Raw inserts performed.
    pub inserts: u64,
    /// Upserts performed.
    pub upserts: u64,
    /// Deletes that removed a document.
    pub deletes: u64,
    /// Point lookups performed.
    pub finds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = StoreStats::new();
        stats.record_connection_open();
        stats.record_transaction_start(true);
        stats.record_transaction_start(false);
        stats.record_commit();
        stats.record_write_conflict();
        stats.record_rollback();

        let snap = stats.snapshot();
        assert_eq!(snap.connections_opened, 1);
        assert_eq!(snap.exclusive_transactions, 1);
        assert_eq!(snap.write_transactions, 1);
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.write_conflicts, 1);
        assert_eq!(snap.rollbacks, 1);

        stats.record_connection_close();
        assert_eq!(stats.connections_open(), 0);
    }
}
