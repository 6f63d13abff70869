//! Connection and transaction interfaces consumed by the replier.

use crate::error::StoreResult;
use replidb_oplog::{Document, DocumentId, Namespace};

/// Definition of a single-field secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, unique within its collection.
    pub name: String,
    /// Indexed top-level field.
    pub field: String,
    /// Whether two documents may share a value of `field`.
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique index definition.
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            unique: false,
        }
    }

    /// Creates a unique index definition.
    pub fn unique(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            unique: true,
            ..Self::new(name, field)
        }
    }
}

/// Source of connections to a document store.
///
/// Providers are shared between threads; each call hands out an independent
/// connection.
pub trait ConnectionProvider: Send + Sync {
    /// Connection type handed out by this provider.
    type Connection: Connection;

    /// Opens a connection. Dropping the connection releases it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot hand out a connection.
    fn open_connection(&self) -> StoreResult<Self::Connection>;
}

/// An open connection to a document store.
pub trait Connection {
    /// Non-exclusive write transaction type.
    type WriteTxn: WriteTransaction;
    /// Exclusive write transaction type.
    type ExclusiveTxn: ExclusiveWriteTransaction;

    /// Opens a non-exclusive write transaction.
    ///
    /// Several of these may be open at once; races between them are
    /// detected when they commit. Blocks while an exclusive transaction is
    /// open.
    fn open_write_transaction(&self) -> StoreResult<Self::WriteTxn>;

    /// Opens a write transaction that locks out every other writer.
    ///
    /// Blocks until all open write transactions have finished.
    fn open_exclusive_write_transaction(&self) -> StoreResult<Self::ExclusiveTxn>;
}

/// A scoped write transaction.
///
/// Reads see committed data plus the writes of this transaction. Writes
/// become visible to others only on [`commit`](WriteTransaction::commit).
/// Dropping the transaction without committing rolls it back.
pub trait WriteTransaction {
    /// Returns the current image of a document.
    fn find(&self, namespace: &Namespace, id: &DocumentId) -> StoreResult<Option<Document>>;

    /// Returns the number of documents in a collection (zero if missing).
    fn count(&self, namespace: &Namespace) -> StoreResult<usize>;

    /// Returns true if the collection exists.
    fn collection_exists(&self, namespace: &Namespace) -> StoreResult<bool>;

    /// Inserts a new document without checking for an existing one.
    ///
    /// The collection is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueIndexViolation`](crate::StoreError::UniqueIndexViolation)
    /// if the `_id` or a unique secondary key is already present, and
    /// [`StoreError::InvalidDocument`](crate::StoreError::InvalidDocument) if
    /// the document has no `_id`.
    fn insert(&mut self, namespace: &Namespace, document: Document) -> StoreResult<()>;

    /// Inserts a document or replaces the one with the same `_id`.
    ///
    /// Returns true if a document was replaced.
    fn upsert(&mut self, namespace: &Namespace, document: Document) -> StoreResult<bool>;

    /// Deletes a document. Returns true if it existed.
    fn delete(&mut self, namespace: &Namespace, id: &DocumentId) -> StoreResult<bool>;

    /// Commits all writes atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteConflict`](crate::StoreError::WriteConflict)
    /// if a concurrent commit touched the same data; nothing is applied in
    /// that case.
    fn commit(self) -> StoreResult<()>
    where
        Self: Sized;

    /// Discards all writes.
    fn rollback(self) -> StoreResult<()>
    where
        Self: Sized;
}

/// A write transaction that holds the store exclusively and may change the
/// schema.
pub trait ExclusiveWriteTransaction: WriteTransaction {
    /// Creates a collection. Returns false if it already existed.
    fn create_collection(&mut self, namespace: &Namespace) -> StoreResult<bool>;

    /// Drops a collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`](crate::StoreError::CollectionNotFound)
    /// if the collection does not exist.
    fn drop_collection(&mut self, namespace: &Namespace) -> StoreResult<()>;

    /// Drops every collection of a database. Returns how many were dropped.
    fn drop_database(&mut self, database: &str) -> StoreResult<usize>;

    /// Builds an index, creating the collection if missing.
    ///
    /// Returns false if an identical index already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueIndexViolation`](crate::StoreError::UniqueIndexViolation)
    /// if existing documents violate a new unique index, and
    /// [`StoreError::InvalidOperation`](crate::StoreError::InvalidOperation)
    /// if an index with the same name but a different definition exists.
    fn create_index(&mut self, namespace: &Namespace, index: IndexSpec) -> StoreResult<bool>;

    /// Drops an index by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`](crate::StoreError::CollectionNotFound)
    /// or [`StoreError::IndexNotFound`](crate::StoreError::IndexNotFound)
    /// when the target is missing.
    fn drop_index(&mut self, namespace: &Namespace, name: &str) -> StoreResult<()>;
}
