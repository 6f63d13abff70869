//! Sequential reference model of operation semantics.
//!
//! The model applies create/update/delete operations one at a time, with no
//! batching, merging or transactions. Whatever the replier does to a store
//! must end in the same state as this model.

use crate::fixtures::store_contents;
use replidb_oplog::{Document, DocumentId, Namespace, Operation, OperationBody};
use replidb_store::MemoryServer;
use std::collections::BTreeMap;

/// Document state produced by applying operations one by one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequentialModel {
    documents: BTreeMap<(Namespace, DocumentId), Document>,
}

impl SequentialModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a model holding the committed contents of a store.
    pub fn from_store(server: &MemoryServer) -> Self {
        Self {
            documents: store_contents(server),
        }
    }

    /// Creates a model holding `documents`.
    pub fn with_documents<I>(documents: I) -> Self
    where
        I: IntoIterator<Item = (Namespace, Document)>,
    {
        let documents = documents
            .into_iter()
            .filter_map(|(namespace, doc)| DocumentId::of(&doc).map(|id| ((namespace, id), doc)))
            .collect();
        Self { documents }
    }

    /// Applies one operation. Commands and no-ops are ignored.
    pub fn apply(&mut self, operation: &Operation, updates_as_upserts: bool) {
        let namespace = operation.namespace.clone();
        match &operation.body {
            OperationBody::Insert { id, document } => {
                self.documents.insert((namespace, id.clone()), document.clone());
            }
            OperationBody::Update {
                id,
                modification,
                upsert,
            } => {
                let key = (namespace, id.clone());
                match self.documents.get(&key) {
                    Some(current) => {
                        let next = modification.apply(id, current);
                        self.documents.insert(key, next);
                    }
                    None if *upsert || updates_as_upserts => {
                        let next = modification.apply(id, &id.seed_document());
                        self.documents.insert(key, next);
                    }
                    None => {}
                }
            }
            OperationBody::Delete { id } => {
                self.documents.remove(&(namespace, id.clone()));
            }
            OperationBody::Command(_) | OperationBody::Noop => {}
        }
    }

    /// Applies operations in order.
    pub fn apply_all<'a, I>(&mut self, operations: I, updates_as_upserts: bool)
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        for operation in operations {
            self.apply(operation, updates_as_upserts);
        }
    }

    /// Returns the modelled documents.
    pub fn documents(&self) -> &BTreeMap<(Namespace, DocumentId), Document> {
        &self.documents
    }

    /// Returns true if the store holds exactly the modelled documents.
    pub fn matches(&self, server: &MemoryServer) -> bool {
        store_contents(server) == self.documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{delete_op, document, insert_op, ns, set_op};
    use serde_json::json;

    #[test]
    fn update_of_missing_document() {
        let mut model = SequentialModel::new();
        model.apply(&set_op(1, "db.c", 1, json!({"a": 1}), false), false);
        assert!(model.documents().is_empty());

        model.apply(&set_op(2, "db.c", 1, json!({"a": 1}), false), true);
        assert_eq!(
            model.documents().get(&(ns("db.c"), DocumentId::from(1))),
            Some(&document(json!({"_id": 1, "a": 1})))
        );
    }

    #[test]
    fn insert_update_delete_sequence() {
        let mut model = SequentialModel::new();
        model.apply_all(
            &[
                insert_op(1, "db.c", json!({"_id": 1, "a": 1})),
                set_op(2, "db.c", 1, json!({"b": 2}), false),
                insert_op(3, "db.c", json!({"_id": 2})),
                delete_op(4, "db.c", 2),
            ],
            false,
        );
        assert_eq!(model.documents().len(), 1);
        assert_eq!(
            model.documents().values().next(),
            Some(&document(json!({"_id": 1, "a": 1, "b": 2})))
        );
    }
}
