//! Committed state of the in-memory store.

use super::view::CollectionView;
use crate::api::IndexSpec;
use crate::error::{StoreError, StoreResult};
use replidb_oplog::{Document, DocumentId, Namespace};
use std::collections::{BTreeMap, HashMap};

/// Name reported for collisions on the identity index.
pub const ID_INDEX: &str = "_id_";

/// A committed collection.
#[derive(Debug, Clone, Default)]
pub(crate) struct Collection {
    pub(crate) documents: BTreeMap<DocumentId, Document>,
    pub(crate) indexes: BTreeMap<String, IndexSpec>,
}

/// Uncommitted changes of one transaction to one namespace.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingCollection {
    /// Committed documents are hidden (collection dropped or recreated).
    pub(crate) truncated: bool,
    /// Set when this transaction created or dropped the collection.
    pub(crate) exists: Option<bool>,
    /// Replacement index set, if this transaction changed it.
    pub(crate) indexes: Option<BTreeMap<String, IndexSpec>>,
    /// Written documents; `None` marks a delete.
    pub(crate) documents: BTreeMap<DocumentId, Option<Document>>,
}

impl PendingCollection {
    fn changes_schema(&self) -> bool {
        self.truncated || self.exists.is_some() || self.indexes.is_some()
    }
}

/// All committed collections plus the version bookkeeping used to detect
/// write conflicts.
///
/// Every commit gets the next sequence number. A document's version is the
/// sequence of the last commit that wrote it; a namespace's schema version
/// is the sequence of the last commit that created, dropped or re-indexed
/// it. Versions of deleted documents are kept so that a delete racing with
/// a write is still detected.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    collections: BTreeMap<Namespace, Collection>,
    seq: u64,
    versions: HashMap<Namespace, HashMap<DocumentId, u64>>,
    schema_versions: HashMap<Namespace, u64>,
}

impl Catalog {
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn collection(&self, namespace: &Namespace) -> Option<&Collection> {
        self.collections.get(namespace)
    }

    pub(crate) fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.collections.keys()
    }

    fn version(&self, namespace: &Namespace, id: &DocumentId) -> u64 {
        self.versions
            .get(namespace)
            .and_then(|ids| ids.get(id))
            .copied()
            .unwrap_or(0)
    }

    fn schema_version(&self, namespace: &Namespace) -> u64 {
        self.schema_versions.get(namespace).copied().unwrap_or(0)
    }

    /// Checks that a transaction begun at `snapshot` can still commit.
    pub(crate) fn validate(
        &self,
        pending: &BTreeMap<Namespace, PendingCollection>,
        snapshot: u64,
    ) -> StoreResult<()> {
        for (namespace, changes) in pending {
            if self.schema_version(namespace) > snapshot {
                return Err(StoreError::write_conflict(
                    namespace,
                    "collection changed by a concurrent transaction",
                ));
            }

            for id in changes.documents.keys() {
                if self.version(namespace, id) > snapshot {
                    return Err(StoreError::write_conflict(
                        namespace,
                        format!("document {id} changed by a concurrent transaction"),
                    ));
                }
            }

            // unique keys written concurrently under different ids
            let view = CollectionView::new(self.collection(namespace), Some(changes));
            for index in view.indexes().filter(|index| index.unique) {
                if let Some(key) = view.find_duplicate(&index.field) {
                    return Err(StoreError::write_conflict(
                        namespace,
                        format!("key {key} of index {} inserted concurrently", index.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Applies validated changes and returns the new commit sequence.
    pub(crate) fn apply(&mut self, pending: BTreeMap<Namespace, PendingCollection>) -> u64 {
        self.seq += 1;
        let seq = self.seq;

        for (namespace, changes) in pending {
            if changes.changes_schema() {
                self.schema_versions.insert(namespace.clone(), seq);
            }

            match changes.exists {
                Some(false) => {
                    self.collections.remove(&namespace);
                    self.versions.remove(&namespace);
                    continue;
                }
                Some(true) if changes.truncated => {
                    self.collections
                        .insert(namespace.clone(), Collection::default());
                    self.versions.remove(&namespace);
                }
                _ => {}
            }

            let collection = self.collections.entry(namespace.clone()).or_default();
            if let Some(indexes) = changes.indexes {
                collection.indexes = indexes;
            }

            let versions = self.versions.entry(namespace).or_default();
            for (id, document) in changes.documents {
                match document {
                    Some(document) => {
                        collection.documents.insert(id.clone(), document);
                    }
                    None => {
                        collection.documents.remove(&id);
                    }
                }
                versions.insert(id, seq);
            }
        }

        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orders() -> Namespace {
        Namespace::new("shop", "orders")
    }

    fn doc(id: i64, sku: &str) -> Document {
        json!({"_id": id, "sku": sku}).as_object().cloned().unwrap()
    }

    fn put(id: i64, sku: &str) -> BTreeMap<Namespace, PendingCollection> {
        let mut changes = PendingCollection::default();
        changes
            .documents
            .insert(DocumentId::from(id), Some(doc(id, sku)));
        BTreeMap::from([(orders(), changes)])
    }

    #[test]
    fn apply_assigns_versions() {
        let mut catalog = Catalog::default();
        assert_eq!(catalog.apply(put(1, "a")), 1);
        assert_eq!(catalog.apply(put(2, "b")), 2);

        assert_eq!(catalog.version(&orders(), &DocumentId::from(1)), 1);
        assert_eq!(catalog.version(&orders(), &DocumentId::from(2)), 2);
        assert_eq!(catalog.collection(&orders()).unwrap().documents.len(), 2);
    }

    #[test]
    fn stale_write_is_rejected() {
        let mut catalog = Catalog::default();
        catalog.apply(put(1, "a"));
        let snapshot = catalog.seq();
        catalog.apply(put(1, "b"));

        let err = catalog.validate(&put(1, "c"), snapshot).unwrap_err();
        assert!(err.is_write_conflict());
        assert!(catalog.validate(&put(1, "c"), catalog.seq()).is_ok());
    }

    #[test]
    fn concurrent_unique_key_is_rejected() {
        let mut catalog = Catalog::default();
        let mut schema = PendingCollection {
            exists: Some(true),
            truncated: true,
            ..Default::default()
        };
        schema.indexes = Some(BTreeMap::from([(
            "by_sku".to_string(),
            IndexSpec::unique("by_sku", "sku"),
        )]));
        catalog.apply(BTreeMap::from([(orders(), schema)]));

        let snapshot = catalog.seq();
        catalog.apply(put(1, "a"));

        let err = catalog.validate(&put(2, "a"), snapshot).unwrap_err();
        assert!(err.is_write_conflict());
        assert!(err.to_string().contains("by_sku"));
    }

    #[test]
    fn drop_bumps_schema_version() {
        let mut catalog = Catalog::default();
        catalog.apply(put(1, "a"));
        let snapshot = catalog.seq();

        let dropped = PendingCollection {
            exists: Some(false),
            truncated: true,
            ..Default::default()
        };
        catalog.apply(BTreeMap::from([(orders(), dropped)]));

        assert!(catalog.collection(&orders()).is_none());
        assert!(catalog.validate(&put(2, "b"), snapshot).is_err());
    }
}
