//! Write transactions of the in-memory store.

use super::catalog::{Catalog, PendingCollection};
use super::view::CollectionView;
use super::Shared;
use crate::api::{ExclusiveWriteTransaction, IndexSpec, WriteTransaction};
use crate::error::{StoreError, StoreResult};
use crate::gate::GatePermit;
use replidb_oplog::{Document, DocumentId, Namespace};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// State shared by exclusive and non-exclusive transactions.
///
/// Writes are buffered per namespace and applied under the catalog lock on
/// commit. The gate permit is held until the transaction finishes.
#[derive(Debug)]
struct TransactionCore {
    shared: Arc<Shared>,
    pending: BTreeMap<Namespace, PendingCollection>,
    snapshot_seq: u64,
    permit: Option<GatePermit>,
    finished: bool,
}

impl TransactionCore {
    fn begin(shared: Arc<Shared>, exclusive: bool) -> Self {
        let permit = if exclusive {
            shared.gate.enter_exclusive()
        } else {
            shared.gate.enter_shared()
        };
        let snapshot_seq = shared.catalog.read().seq();
        shared.stats.record_transaction_start(exclusive);
        trace!(snapshot_seq, exclusive, "transaction started");

        Self {
            shared,
            pending: BTreeMap::new(),
            snapshot_seq,
            permit: Some(permit),
            finished: false,
        }
    }

    fn view<'a>(&'a self, catalog: &'a Catalog, namespace: &Namespace) -> CollectionView<'a> {
        CollectionView::new(catalog.collection(namespace), self.pending.get(namespace))
    }

    /// Returns the pending changes of a namespace, creating the collection
    /// if it does not exist for this transaction.
    fn touch(&mut self, catalog: &Catalog, namespace: &Namespace) -> &mut PendingCollection {
        let committed = catalog.collection(namespace).is_some();
        let changes = self.pending.entry(namespace.clone()).or_default();
        if !changes.exists.unwrap_or(committed) {
            changes.exists = Some(true);
            changes.truncated = true;
            changes.indexes = Some(BTreeMap::new());
            changes.documents.clear();
        }
        changes
    }

    fn find(&self, namespace: &Namespace, id: &DocumentId) -> Option<Document> {
        self.shared.stats.record_find();
        let catalog = self.shared.catalog.read();
        self.view(&catalog, namespace).find(id).cloned()
    }

    fn count(&self, namespace: &Namespace) -> usize {
        let catalog = self.shared.catalog.read();
        self.view(&catalog, namespace).count()
    }

    fn collection_exists(&self, namespace: &Namespace) -> bool {
        let catalog = self.shared.catalog.read();
        self.view(&catalog, namespace).exists()
    }

    fn store(
        &mut self,
        namespace: &Namespace,
        document: Document,
        replace: bool,
    ) -> StoreResult<bool> {
        let id = DocumentId::of(&document).ok_or_else(|| {
            StoreError::invalid_document(format!("document in {namespace} has no _id"))
        })?;

        let shared = Arc::clone(&self.shared);
        let catalog = shared.catalog.read();
        let view = self.view(&catalog, namespace);
        let existed = view.find(&id).is_some();
        view.check_unique(namespace, &id, &document, !replace)?;

        self.touch(&catalog, namespace)
            .documents
            .insert(id, Some(document));
        Ok(existed)
    }

    fn delete(&mut self, namespace: &Namespace, id: &DocumentId) -> bool {
        let shared = Arc::clone(&self.shared);
        let catalog = shared.catalog.read();
        if self.view(&catalog, namespace).find(id).is_none() {
            return false;
        }

        self.pending
            .entry(namespace.clone())
            .or_default()
            .documents
            .insert(id.clone(), None);
        shared.stats.record_delete();
        true
    }

    fn create_collection(&mut self, namespace: &Namespace) -> bool {
        let shared = Arc::clone(&self.shared);
        let catalog = shared.catalog.read();
        if self.view(&catalog, namespace).exists() {
            return false;
        }
        self.touch(&catalog, namespace);
        true
    }

    fn drop_collection(&mut self, namespace: &Namespace) -> StoreResult<()> {
        let shared = Arc::clone(&self.shared);
        let catalog = shared.catalog.read();
        if !self.view(&catalog, namespace).exists() {
            return Err(StoreError::collection_not_found(namespace));
        }

        let changes = self.pending.entry(namespace.clone()).or_default();
        changes.exists = Some(false);
        changes.truncated = true;
        changes.indexes = None;
        changes.documents.clear();
        Ok(())
    }

    fn drop_database(&mut self, database: &str) -> StoreResult<usize> {
        let targets: BTreeSet<Namespace> = {
            let catalog = self.shared.catalog.read();
            catalog
                .namespaces()
                .chain(self.pending.keys())
                .filter(|ns| ns.database() == database)
                .filter(|ns| self.view(&catalog, ns).exists())
                .cloned()
                .collect()
        };

        for namespace in &targets {
            self.drop_collection(namespace)?;
        }
        Ok(targets.len())
    }

    fn create_index(&mut self, namespace: &Namespace, index: IndexSpec) -> StoreResult<bool> {
        if index.name == super::catalog::ID_INDEX {
            return Err(StoreError::invalid_operation(format!(
                "index name {} is reserved",
                index.name
            )));
        }

        let shared = Arc::clone(&self.shared);
        let catalog = shared.catalog.read();
        let view = self.view(&catalog, namespace);

        if let Some(existing) = view.index(&index.name) {
            if *existing == index {
                return Ok(false);
            }
            return Err(StoreError::invalid_operation(format!(
                "index {} already exists on {namespace} with a different definition",
                index.name
            )));
        }
        if index.unique {
            if let Some(key) = view.find_duplicate(&index.field) {
                return Err(StoreError::unique_violation(namespace, index.name, key));
            }
        }

        let mut indexes: BTreeMap<String, IndexSpec> = view
            .indexes()
            .map(|index| (index.name.clone(), index.clone()))
            .collect();
        indexes.insert(index.name.clone(), index);
        self.touch(&catalog, namespace).indexes = Some(indexes);
        Ok(true)
    }

    fn drop_index(&mut self, namespace: &Namespace, name: &str) -> StoreResult<()> {
        let shared = Arc::clone(&self.shared);
        let catalog = shared.catalog.read();
        let view = self.view(&catalog, namespace);

        if !view.exists() {
            return Err(StoreError::collection_not_found(namespace));
        }
        if view.index(name).is_none() {
            return Err(StoreError::index_not_found(namespace, name));
        }

        let indexes: BTreeMap<String, IndexSpec> = view
            .indexes()
            .filter(|index| index.name != name)
            .map(|index| (index.name.clone(), index.clone()))
            .collect();
        self.pending.entry(namespace.clone()).or_default().indexes = Some(indexes);
        Ok(())
    }

    fn commit(mut self) -> StoreResult<()> {
        self.finished = true;
        let pending = std::mem::take(&mut self.pending);
        let shared = Arc::clone(&self.shared);

        let result = {
            let mut catalog = shared.catalog.write();
            catalog
                .validate(&pending, self.snapshot_seq)
                .map(|()| catalog.apply(pending))
        };
        self.permit.take();

        match result {
            Ok(seq) => {
                shared.stats.record_commit();
                trace!(seq, "transaction committed");
                Ok(())
            }
            Err(err) => {
                shared.stats.record_write_conflict();
                shared.stats.record_rollback();
                debug!(error = %err, snapshot_seq = self.snapshot_seq, "commit refused");
                Err(err)
            }
        }
    }
}

impl Drop for TransactionCore {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.stats.record_rollback();
            trace!(snapshot_seq = self.snapshot_seq, "transaction rolled back");
        }
    }
}

/// Non-exclusive write transaction of a [`MemoryServer`](super::MemoryServer).
#[derive(Debug)]
pub struct MemoryWriteTransaction(TransactionCore);

/// Exclusive write transaction of a [`MemoryServer`](super::MemoryServer).
#[derive(Debug)]
pub struct MemoryExclusiveTransaction(TransactionCore);

impl MemoryWriteTransaction {
    pub(crate) fn begin(shared: Arc<Shared>) -> Self {
        Self(TransactionCore::begin(shared, false))
    }
}

impl MemoryExclusiveTransaction {
    pub(crate) fn begin(shared: Arc<Shared>) -> Self {
        Self(TransactionCore::begin(shared, true))
    }
}

macro_rules! impl_write_transaction {
    ($txn:ty) => {
        impl WriteTransaction for $txn {
            fn find(
                &self,
                namespace: &Namespace,
                id: &DocumentId,
            ) -> StoreResult<Option<Document>> {
                Ok(self.0.find(namespace, id))
            }

            fn count(&self, namespace: &Namespace) -> StoreResult<usize> {
                Ok(self.0.count(namespace))
            }

            fn collection_exists(&self, namespace: &Namespace) -> StoreResult<bool> {
                Ok(self.0.collection_exists(namespace))
            }

            fn insert(&mut self, namespace: &Namespace, document: Document) -> StoreResult<()> {
                self.0.store(namespace, document, false)?;
                self.0.shared.stats.record_insert();
                Ok(())
            }

            fn upsert(&mut self, namespace: &Namespace, document: Document) -> StoreResult<bool> {
                let replaced = self.0.store(namespace, document, true)?;
                self.0.shared.stats.record_upsert();
                Ok(replaced)
            }

            fn delete(&mut self, namespace: &Namespace, id: &DocumentId) -> StoreResult<bool> {
                Ok(self.0.delete(namespace, id))
            }

            fn commit(self) -> StoreResult<()> {
                self.0.commit()
            }

            fn rollback(self) -> StoreResult<()> {
                drop(self);
                Ok(())
            }
        }
    };
}

impl_write_transaction!(MemoryWriteTransaction);
impl_write_transaction!(MemoryExclusiveTransaction);

impl ExclusiveWriteTransaction for MemoryExclusiveTransaction {
    fn create_collection(&mut self, namespace: &Namespace) -> StoreResult<bool> {
        Ok(self.0.create_collection(namespace))
    }

    fn drop_collection(&mut self, namespace: &Namespace) -> StoreResult<()> {
        self.0.drop_collection(namespace)
    }

    fn drop_database(&mut self, database: &str) -> StoreResult<usize> {
        self.0.drop_database(database)
    }

    fn create_index(&mut self, namespace: &Namespace, index: IndexSpec) -> StoreResult<bool> {
        self.0.create_index(namespace, index)
    }

    fn drop_index(&mut self, namespace: &Namespace, name: &str) -> StoreResult<()> {
        self.0.drop_index(namespace, name)
    }
}
