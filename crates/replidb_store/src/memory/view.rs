//! Transaction-local view of a collection: committed data overlaid with
//! the transaction's own writes.

use super::catalog::{Collection, PendingCollection, ID_INDEX};
use crate::api::IndexSpec;
use crate::error::{StoreError, StoreResult};
use replidb_oplog::{Document, DocumentId, Namespace};
use std::collections::HashSet;

/// Canonical text of `field` in `document`, if present.
pub(crate) fn index_key(document: &Document, field: &str) -> Option<String> {
    document.get(field).map(ToString::to_string)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CollectionView<'a> {
    base: Option<&'a Collection>,
    pending: Option<&'a PendingCollection>,
}

impl<'a> CollectionView<'a> {
    pub(crate) fn new(base: Option<&'a Collection>, pending: Option<&'a PendingCollection>) -> Self {
        Self { base, pending }
    }

    fn truncated(&self) -> bool {
        self.pending.is_some_and(|p| p.truncated)
    }

    pub(crate) fn exists(&self) -> bool {
        self.pending
            .and_then(|p| p.exists)
            .unwrap_or(self.base.is_some())
    }

    pub(crate) fn find(&self, id: &DocumentId) -> Option<&'a Document> {
        if let Some(pending) = self.pending {
            if let Some(write) = pending.documents.get(id) {
                return write.as_ref();
            }
        }
        if self.truncated() {
            return None;
        }
        self.base.and_then(|c| c.documents.get(id))
    }

    pub(crate) fn documents(&self) -> impl Iterator<Item = (&'a DocumentId, &'a Document)> + 'a {
        let pending = self.pending;
        let committed = self
            .base
            .filter(|_| !pending.is_some_and(|p| p.truncated))
            .into_iter()
            .flat_map(|c| c.documents.iter())
            .filter(move |(id, _)| !pending.is_some_and(|p| p.documents.contains_key(*id)));
        let written = pending
            .into_iter()
            .flat_map(|p| p.documents.iter())
            .filter_map(|(id, doc)| doc.as_ref().map(|doc| (id, doc)));
        committed.chain(written)
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = &'a IndexSpec> + 'a {
        let indexes = match self.pending.and_then(|p| p.indexes.as_ref()) {
            Some(indexes) => Some(indexes),
            None if self.truncated() => None,
            None => self.base.map(|c| &c.indexes),
        };
        indexes.into_iter().flat_map(|indexes| indexes.values())
    }

    pub(crate) fn index(&self, name: &str) -> Option<&'a IndexSpec> {
        self.indexes().find(|index| index.name == name)
    }

    pub(crate) fn count(&self) -> usize {
        self.documents().count()
    }

    /// Returns a key of `field` shared by two documents, if any.
    pub(crate) fn find_duplicate(&self, field: &str) -> Option<String> {
        let mut seen = HashSet::new();
        self.documents()
            .filter_map(|(_, doc)| index_key(doc, field))
            .find(|key| !seen.insert(key.clone()))
    }

    /// Checks that storing `document` under `id` keeps every unique index
    /// unique. `check_id` also rejects an existing document with that id.
    pub(crate) fn check_unique(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
        document: &Document,
        check_id: bool,
    ) -> StoreResult<()> {
        if check_id && self.find(id).is_some() {
            return Err(StoreError::unique_violation(namespace, ID_INDEX, id.as_key()));
        }

        for index in self.indexes().filter(|index| index.unique) {
            let Some(key) = index_key(document, &index.field) else {
                continue;
            };
            let taken = self.documents().any(|(other, doc)| {
                other != id && index_key(doc, &index.field).as_deref() == Some(key.as_str())
            });
            if taken {
                return Err(StoreError::unique_violation(namespace, &index.name, key));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn doc(id: i64, sku: &str) -> Document {
        json!({"_id": id, "sku": sku}).as_object().cloned().unwrap()
    }

    fn committed() -> Collection {
        let mut collection = Collection::default();
        collection
            .documents
            .insert(DocumentId::from(1), doc(1, "a"));
        collection
            .documents
            .insert(DocumentId::from(2), doc(2, "b"));
        collection
            .indexes
            .insert("by_sku".into(), IndexSpec::unique("by_sku", "sku"));
        collection
    }

    #[test]
    fn pending_writes_shadow_committed_documents() {
        let base = committed();
        let mut pending = PendingCollection::default();
        pending.documents.insert(DocumentId::from(1), None);
        pending
            .documents
            .insert(DocumentId::from(3), Some(doc(3, "c")));

        let view = CollectionView::new(Some(&base), Some(&pending));
        assert!(view.find(&DocumentId::from(1)).is_none());
        assert!(view.find(&DocumentId::from(2)).is_some());
        assert!(view.find(&DocumentId::from(3)).is_some());
        assert_eq!(view.count(), 2);
    }

    #[test]
    fn truncated_view_hides_committed_state() {
        let base = committed();
        let pending = PendingCollection {
            truncated: true,
            exists: Some(true),
            indexes: Some(BTreeMap::new()),
            ..Default::default()
        };

        let view = CollectionView::new(Some(&base), Some(&pending));
        assert!(view.exists());
        assert_eq!(view.count(), 0);
        assert_eq!(view.indexes().count(), 0);
    }

    #[test]
    fn unique_checks() {
        let base = committed();
        let ns = Namespace::new("shop", "orders");
        let view = CollectionView::new(Some(&base), None);

        let err = view
            .check_unique(&ns, &DocumentId::from(1), &doc(1, "z"), true)
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueIndexViolation { ref index, .. } if index == ID_INDEX));

        let err = view
            .check_unique(&ns, &DocumentId::from(9), &doc(9, "a"), true)
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueIndexViolation { ref index, .. } if index == "by_sku"));

        // replacing a document may keep its own key
        assert!(view
            .check_unique(&ns, &DocumentId::from(1), &doc(1, "a"), false)
            .is_ok());
        assert_eq!(view.find_duplicate("sku"), None);
    }
}
