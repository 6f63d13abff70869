//! Fault-injecting store wrappers.
//!
//! [`FaultyServer`] wraps any [`ConnectionProvider`] and forwards every call
//! to it. Faults are armed with a count: the next `n` matching calls fail
//! with a synthetic error instead of reaching the wrapped store. All
//! connections and transactions opened through the wrapper are counted.

use replidb_oplog::{Document, DocumentId, Namespace};
use replidb_store::{
    Connection, ConnectionProvider, ExclusiveWriteTransaction, IndexSpec, MemoryServer,
    StoreError, StoreResult, WriteTransaction,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct FaultState {
    commit_conflicts: AtomicU64,
    insert_violations: AtomicU64,
    upsert_violations: AtomicU64,

    connections: AtomicU64,
    write_transactions: AtomicU64,
    exclusive_transactions: AtomicU64,
    commits: AtomicU64,
    injected: AtomicU64,
}

impl FaultState {
    fn take(counter: &AtomicU64) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn fire(&self, armed: &AtomicU64) -> bool {
        let fired = Self::take(armed);
        if fired {
            self.injected.fetch_add(1, Ordering::SeqCst);
        }
        fired
    }
}

/// Counters of calls that went through a [`FaultyServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultStats {
    /// Connections opened.
    pub connections: u64,
    /// Non-exclusive write transactions opened.
    pub write_transactions: u64,
    /// Exclusive write transactions opened.
    pub exclusive_transactions: u64,
    /// Commits that reached the wrapped store and succeeded.
    pub commits: u64,
    /// Faults injected so far.
    pub injected: u64,
}

/// A connection provider that counts calls and injects failures.
#[derive(Debug, Clone)]
pub struct FaultyServer<P = MemoryServer> {
    inner: P,
    state: Arc<FaultState>,
}

impl<P: ConnectionProvider> FaultyServer<P> {
    /// Wraps a provider with no faults armed.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState::default()),
        }
    }

    /// Returns the wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Makes the next `n` commits fail with a write conflict. The failed
    /// transactions are rolled back.
    pub fn inject_commit_conflicts(&self, n: u64) {
        self.state.commit_conflicts.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` raw inserts fail with a unique index violation.
    pub fn inject_insert_violations(&self, n: u64) {
        self.state.insert_violations.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` upserts fail with a unique index violation.
    pub fn inject_upsert_violations(&self, n: u64) {
        self.state.upsert_violations.store(n, Ordering::SeqCst);
    }

    /// Returns the call counters.
    pub fn stats(&self) -> FaultStats {
        let s = &self.state;
        FaultStats {
            connections: s.connections.load(Ordering::SeqCst),
            write_transactions: s.write_transactions.load(Ordering::SeqCst),
            exclusive_transactions: s.exclusive_transactions.load(Ordering::SeqCst),
            commits: s.commits.load(Ordering::SeqCst),
            injected: s.injected.load(Ordering::SeqCst),
        }
    }
}

impl<P: ConnectionProvider> ConnectionProvider for FaultyServer<P> {
    type Connection = FaultyConnection<P::Connection>;

    fn open_connection(&self) -> StoreResult<Self::Connection> {
        let inner = self.inner.open_connection()?;
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        Ok(FaultyConnection {
            inner,
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection handed out by a [`FaultyServer`].
#[derive(Debug)]
pub struct FaultyConnection<C> {
    inner: C,
    state: Arc<FaultState>,
}

impl<C: Connection> Connection for FaultyConnection<C> {
    type WriteTxn = FaultyTransaction<C::WriteTxn>;
    type ExclusiveTxn = FaultyTransaction<C::ExclusiveTxn>;

    fn open_write_transaction(&self) -> StoreResult<Self::WriteTxn> {
        let inner = self.inner.open_write_transaction()?;
        self.state.write_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(FaultyTransaction {
            inner,
            state: Arc::clone(&self.state),
        })
    }

    fn open_exclusive_write_transaction(&self) -> StoreResult<Self::ExclusiveTxn> {
        let inner = self.inner.open_exclusive_write_transaction()?;
        self.state
            .exclusive_transactions
            .fetch_add(1, Ordering::SeqCst);
        Ok(FaultyTransaction {
            inner,
            state: Arc::clone(&self.state),
        })
    }
}

/// Transaction handed out by a [`FaultyConnection`].
#[derive(Debug)]
pub struct FaultyTransaction<T> {
    inner: T,
    state: Arc<FaultState>,
}

impl<T: WriteTransaction> WriteTransaction for FaultyTransaction<T> {
    fn find(&self, namespace: &Namespace, id: &DocumentId) -> StoreResult<Option<Document>> {
        self.inner.find(namespace, id)
    }

    fn count(&self, namespace: &Namespace) -> StoreResult<usize> {
        self.inner.count(namespace)
    }

    fn collection_exists(&self, namespace: &Namespace) -> StoreResult<bool> {
        self.inner.collection_exists(namespace)
    }

    fn insert(&mut self, namespace: &Namespace, document: Document) -> StoreResult<()> {
        if self.state.fire(&self.state.insert_violations) {
            let key = DocumentId::of(&document).map(|id| id.as_key().to_string());
            return Err(StoreError::unique_violation(
                namespace,
                replidb_store::ID_INDEX,
                key.unwrap_or_default(),
            ));
        }
        self.inner.insert(namespace, document)
    }

    fn upsert(&mut self, namespace: &Namespace, document: Document) -> StoreResult<bool> {
        if self.state.fire(&self.state.upsert_violations) {
            return Err(StoreError::unique_violation(namespace, "injected", "injected"));
        }
        self.inner.upsert(namespace, document)
    }

    fn delete(&mut self, namespace: &Namespace, id: &DocumentId) -> StoreResult<bool> {
        self.inner.delete(namespace, id)
    }

    fn commit(self) -> StoreResult<()> {
        if self.state.fire(&self.state.commit_conflicts) {
            self.inner.rollback()?;
            return Err(StoreError::write_conflict("injected", "injected commit conflict"));
        }
        self.inner.commit()?;
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(self) -> StoreResult<()> {
        self.inner.rollback()
    }
}

impl<T: ExclusiveWriteTransaction> ExclusiveWriteTransaction for FaultyTransaction<T> {
    fn create_collection(&mut self, namespace: &Namespace) -> StoreResult<bool> {
        self.inner.create_collection(namespace)
    }

    fn drop_collection(&mut self, namespace: &Namespace) -> StoreResult<()> {
        self.inner.drop_collection(namespace)
    }

    fn drop_database(&mut self, database: &str) -> StoreResult<usize> {
        self.inner.drop_database(database)
    }

    fn create_index(&mut self, namespace: &Namespace, index: IndexSpec) -> StoreResult<bool> {
        self.inner.create_index(namespace, index)
    }

    fn drop_index(&mut self, namespace: &Namespace, name: &str) -> StoreResult<()> {
        self.inner.drop_index(namespace, name)
    }
}
