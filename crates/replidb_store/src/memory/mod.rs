//! In-memory reference backend.
//!
//! [`MemoryServer`] keeps every collection in memory behind a single
//! catalog lock. Non-exclusive transactions buffer their writes and are
//! validated at commit: a transaction fails with a write conflict if any
//! document or collection it wrote was changed by a transaction that
//! committed after it began. Exclusive transactions go through a
//! [`WriteGate`] and never run alongside another writer.
//!
//! A thread that holds an open write transaction must not open an exclusive
//! one; the gate would wait for the first transaction forever.

mod catalog;
mod transaction;
mod view;

pub use catalog::ID_INDEX;
pub use transaction::{MemoryExclusiveTransaction, MemoryWriteTransaction};

use crate::api::{Connection, ConnectionProvider, IndexSpec};
use crate::error::StoreResult;
use crate::gate::WriteGate;
use crate::stats::StoreStats;
use catalog::Catalog;
use parking_lot::RwLock;
use replidb_oplog::{Document, DocumentId, Namespace};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct Shared {
    catalog: RwLock<Catalog>,
    gate: Arc<WriteGate>,
    stats: StoreStats,
}

/// An in-memory document store.
///
/// Cloning a server yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    shared: Arc<Shared>,
}

impl MemoryServer {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store counters.
    pub fn stats(&self) -> &StoreStats {
        &self.shared.stats
    }

    /// Returns the writer gate.
    pub fn write_gate(&self) -> &WriteGate {
        &self.shared.gate
    }

    /// Returns the sequence number of the last commit.
    pub fn committed_seq(&self) -> u64 {
        self.shared.catalog.read().seq()
    }

    /// Returns the committed collections in name order.
    pub fn collections(&self) -> Vec<Namespace> {
        self.shared.catalog.read().namespaces().cloned().collect()
    }

    /// Returns the committed documents of a collection in `_id` order.
    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.shared
            .catalog
            .read()
            .collection(namespace)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a committed document.
    pub fn find(&self, namespace: &Namespace, id: &DocumentId) -> Option<Document> {
        self.shared
            .catalog
            .read()
            .collection(namespace)
            .and_then(|c| c.documents.get(id).cloned())
    }

    /// Returns the number of committed documents in a collection.
    pub fn count(&self, namespace: &Namespace) -> usize {
        self.shared
            .catalog
            .read()
            .collection(namespace)
            .map_or(0, |c| c.documents.len())
    }

    /// Returns the secondary indexes of a collection.
    pub fn indexes(&self, namespace: &Namespace) -> Vec<IndexSpec> {
        self.shared
            .catalog
            .read()
            .collection(namespace)
            .map(|c| c.indexes.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl ConnectionProvider for MemoryServer {
    type Connection = MemoryConnection;

    fn open_connection(&self) -> StoreResult<MemoryConnection> {
        self.shared.stats.record_connection_open();
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
        })
    }
}

/// A connection to a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

impl Connection for MemoryConnection {
    type WriteTxn = MemoryWriteTransaction;
    type ExclusiveTxn = MemoryExclusiveTransaction;

    fn open_write_transaction(&self) -> StoreResult<MemoryWriteTransaction> {
        Ok(MemoryWriteTransaction::begin(Arc::clone(&self.shared)))
    }

    fn open_exclusive_write_transaction(&self) -> StoreResult<MemoryExclusiveTransaction> {
        Ok(MemoryExclusiveTransaction::begin(Arc::clone(&self.shared)))
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.stats.record_connection_close();
    }
}
