//! Namespace jobs: the net effect of a batch on one collection.

use crate::error::{OplogError, OplogResult};
use crate::namespace::{Document, DocumentId, Namespace};
use crate::operation::{Modification, Operation, OperationBody};
use std::collections::HashMap;

/// One update folded into a [`DocumentMutation::Patch`].
#[derive(Debug, Clone, PartialEq)]
pub struct PatchStep {
    /// The change to apply.
    pub modification: Modification,
    /// Whether the update creates a missing document.
    pub upsert: bool,
}

/// Net change to a single document after merging every operation on it.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentMutation {
    /// The document is new; it can be inserted without touching prior state.
    Insert(Document),
    /// The final image is fully known, whatever existed before.
    Replace(Document),
    /// Updates that depend on the current image, in source order.
    Patch(Vec<PatchStep>),
    /// The document must end up absent.
    Delete,
}

impl DocumentMutation {
    fn first(body: &OperationBody) -> Option<Self> {
        match body {
            OperationBody::Insert { document, .. } => {
                Some(DocumentMutation::Insert(document.clone()))
            }
            OperationBody::Update {
                modification,
                upsert,
                ..
            } => Some(DocumentMutation::Patch(vec![PatchStep {
                modification: modification.clone(),
                upsert: *upsert,
            }])),
            OperationBody::Delete { .. } => Some(DocumentMutation::Delete),
            OperationBody::Command(_) | OperationBody::Noop => None,
        }
    }

    fn merge(self, id: &DocumentId, body: &OperationBody) -> Self {
        use DocumentMutation::*;

        match (self, body) {
            (_, OperationBody::Delete { .. }) => Delete,
            (_, OperationBody::Insert { document, .. }) => Replace(document.clone()),
            (
                current,
                OperationBody::Update {
                    modification,
                    upsert,
                    ..
                },
            ) => match current {
                Insert(doc) => Insert(modification.apply(id, &doc)),
                Replace(doc) => Replace(modification.apply(id, &doc)),
                Patch(mut steps) => {
                    steps.push(PatchStep {
                        modification: modification.clone(),
                        upsert: *upsert,
                    });
                    Patch(steps)
                }
                Delete if *upsert => Replace(modification.apply(id, &id.seed_document())),
                Delete => Delete,
            },
            (current, OperationBody::Command(_) | OperationBody::Noop) => current,
        }
    }

    /// Returns true if the final image depends on the stored document.
    pub fn needs_current_image(&self) -> bool {
        matches!(self, DocumentMutation::Patch(_))
    }

    /// Computes the final image of document `id` given its current image.
    ///
    /// Patch steps against a missing document create it when the step is an
    /// upsert or `updates_as_upserts` is set; otherwise they do nothing.
    pub fn resolve(
        &self,
        id: &DocumentId,
        current: Option<&Document>,
        updates_as_upserts: bool,
    ) -> Option<Document> {
        match self {
            DocumentMutation::Insert(doc) | DocumentMutation::Replace(doc) => Some(doc.clone()),
            DocumentMutation::Delete => None,
            DocumentMutation::Patch(steps) => {
                steps.iter().fold(current.cloned(), |image, step| match image {
                    Some(doc) => Some(step.modification.apply(id, &doc)),
                    None if step.upsert || updates_as_upserts => {
                        Some(step.modification.apply(id, &id.seed_document()))
                    }
                    None => None,
                })
            }
        }
    }
}

/// The net mutation a batch applies to one namespace.
///
/// Mutations are kept in the order each document was first touched. The
/// application mode (optimistic or pessimistic) is not part of the job; it
/// is chosen when the job is applied.
#[derive(Debug, Clone)]
pub struct NamespaceJob {
    namespace: Namespace,
    mutations: Vec<(DocumentId, DocumentMutation)>,
    positions: HashMap<DocumentId, usize>,
    operation_count: usize,
}

impl NamespaceJob {
    /// Creates an empty job for a namespace.
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            mutations: Vec::new(),
            positions: HashMap::new(),
            operation_count: 0,
        }
    }

    /// Folds one more operation into the job.
    ///
    /// The operation must be an insert, update or delete on this job's
    /// namespace.
    pub fn push(&mut self, operation: &Operation) -> OplogResult<()> {
        if !operation.kind().is_cud() {
            return Err(OplogError::NotCud {
                ts: operation.ts,
                kind: operation.kind().to_string(),
            });
        }
        if operation.namespace != self.namespace {
            return Err(OplogError::malformed(format!(
                "operation on {} cannot join a job on {}",
                operation.namespace, self.namespace
            )));
        }
        self.absorb(operation);
        Ok(())
    }

    pub(crate) fn absorb(&mut self, operation: &Operation) {
        let Some(id) = operation.document_id() else {
            return;
        };
        self.operation_count += 1;

        match self.positions.get(id) {
            Some(&pos) => {
                let (id, current) = &mut self.mutations[pos];
                let previous = std::mem::replace(current, DocumentMutation::Delete);
                *current = previous.merge(id, &operation.body);
            }
            None => {
                if let Some(mutation) = DocumentMutation::first(&operation.body) {
                    self.positions.insert(id.clone(), self.mutations.len());
                    self.mutations.push((id.clone(), mutation));
                }
            }
        }
    }

    /// Returns the target namespace.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the per-document mutations in first-touch order.
    pub fn mutations(&self) -> impl Iterator<Item = (&DocumentId, &DocumentMutation)> {
        self.mutations.iter().map(|(id, m)| (id, m))
    }

    /// Returns the mutation for a document, if the job touches it.
    pub fn mutation(&self, id: &DocumentId) -> Option<&DocumentMutation> {
        self.positions.get(id).map(|&pos| &self.mutations[pos].1)
    }

    /// Returns the number of distinct documents touched.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if the job touches no document.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Returns how many source operations were merged into this job.
    pub fn operation_count(&self) -> usize {
        self.operation_count
    }
}
