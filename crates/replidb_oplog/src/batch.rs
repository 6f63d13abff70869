//! Analyzed batches: classified units ready for application.

use crate::error::{OplogError, OplogResult};
use crate::job::NamespaceJob;
use crate::namespace::Namespace;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A batch holding exactly one operation that cannot be merged.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleOpBatch {
    operation: Operation,
}

impl SingleOpBatch {
    /// Wraps one operation.
    pub fn new(operation: Operation) -> Self {
        Self { operation }
    }

    /// Returns the wrapped operation.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

/// An ordered run of create/update/delete operations applied as namespace
/// jobs.
///
/// The original operation list is kept so the last applied operation can be
/// reported no matter how the jobs were merged.
#[derive(Debug, Clone, PartialEq)]
pub struct CudBatch {
    operations: Vec<Operation>,
}

impl CudBatch {
    /// Builds a batch, rejecting empty lists and non-CUD operations.
    pub fn new(operations: Vec<Operation>) -> OplogResult<Self> {
        if operations.is_empty() {
            return Err(OplogError::EmptyBatch);
        }
        if let Some(op) = operations.iter().find(|op| !op.kind().is_cud()) {
            return Err(OplogError::NotCud {
                ts: op.ts,
                kind: op.kind().to_string(),
            });
        }
        Ok(Self { operations })
    }

    /// Returns the original operations in source order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Returns the number of original operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Always false; a CUD batch is never empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the last operation of the original list.
    pub fn last_operation(&self) -> &Operation {
        // non-empty by construction
        &self.operations[self.operations.len() - 1]
    }

    /// Derives the namespace jobs of this batch.
    ///
    /// Jobs come out in order of each namespace's first appearance. The
    /// sequence is rebuilt on every call, so a retried batch never sees
    /// state from a previous attempt.
    pub fn namespace_jobs(&self) -> impl Iterator<Item = NamespaceJob> {
        let mut jobs: Vec<NamespaceJob> = Vec::new();
        let mut index: HashMap<&Namespace, usize> = HashMap::new();

        for op in &self.operations {
            let pos = *index.entry(&op.namespace).or_insert_with(|| {
                jobs.push(NamespaceJob::new(op.namespace.clone()));
                jobs.len() - 1
            });
            jobs[pos].absorb(op);
        }

        jobs.into_iter()
    }
}

/// A classified unit ready for application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBatch", into = "RawBatch")]
pub enum AnalyzedBatch {
    /// One unmergeable operation.
    Single(SingleOpBatch),
    /// A run of mergeable create/update/delete operations.
    Cud(CudBatch),
}

impl AnalyzedBatch {
    /// Creates a single-operation batch.
    pub fn single(operation: Operation) -> Self {
        AnalyzedBatch::Single(SingleOpBatch::new(operation))
    }

    /// Creates a CUD batch.
    pub fn cud(operations: Vec<Operation>) -> OplogResult<Self> {
        CudBatch::new(operations).map(AnalyzedBatch::Cud)
    }

    /// Returns the original operations in source order.
    pub fn operations(&self) -> &[Operation] {
        match self {
            AnalyzedBatch::Single(batch) => std::slice::from_ref(&batch.operation),
            AnalyzedBatch::Cud(batch) => batch.operations(),
        }
    }

    /// Returns the operation a caller checkpoints on after success.
    pub fn last_operation(&self) -> &Operation {
        match self {
            AnalyzedBatch::Single(batch) => batch.operation(),
            AnalyzedBatch::Cud(batch) => batch.last_operation(),
        }
    }

    /// Returns the number of original operations.
    pub fn len(&self) -> usize {
        self.operations().len()
    }

    /// Always false; batches hold at least one operation.
    pub fn is_empty(&self) -> bool {
        self.operations().is_empty()
    }
}

#[derive(Serialize, Deserialize)]
enum RawBatch {
    #[serde(rename = "single")]
    Single(Operation),
    #[serde(rename = "cud")]
    Cud(Vec<Operation>),
}

impl TryFrom<RawBatch> for AnalyzedBatch {
    type Error = OplogError;

    fn try_from(raw: RawBatch) -> OplogResult<Self> {
        match raw {
            RawBatch::Single(op) => Ok(AnalyzedBatch::single(op)),
            RawBatch::Cud(ops) => AnalyzedBatch::cud(ops),
        }
    }
}

impl From<AnalyzedBatch> for RawBatch {
    fn from(batch: AnalyzedBatch) -> Self {
        match batch {
            AnalyzedBatch::Single(batch) => RawBatch::Single(batch.operation),
            AnalyzedBatch::Cud(batch) => RawBatch::Cud(batch.operations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::DocumentId;
    use crate::operation::{Command, Modification};
    use crate::Document;
    use serde_json::json;

    fn orders() -> Namespace {
        Namespace::new("shop", "orders")
    }

    fn items() -> Namespace {
        Namespace::new("shop", "items")
    }

    fn insert(ts: u64, ns: Namespace, id: i64) -> Operation {
        let doc = json!({"_id": id}).as_object().cloned().unwrap();
        Operation::insert(ts, ns, doc).unwrap()
    }

    #[test]
    fn cud_batch_validation() {
        assert_eq!(CudBatch::new(vec![]), Err(OplogError::EmptyBatch));

        let err = CudBatch::new(vec![
            insert(1, orders(), 1),
            Operation::command(2, "shop", Command::DropDatabase),
        ])
        .unwrap_err();
        assert!(matches!(err, OplogError::NotCud { ts: 2, .. }));
    }

    #[test]
    fn last_operation_is_last_of_original_list() {
        let batch = CudBatch::new(vec![
            insert(1, orders(), 1),
            Operation::update(2, orders(), 1, Modification::set(Document::new()), false),
            Operation::delete(3, orders(), 1),
        ])
        .unwrap();

        assert_eq!(batch.last_operation().ts, 3);
        let jobs: Vec<_> = batch.namespace_jobs().collect();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].len(), 1);
        assert_eq!(jobs[0].operation_count(), 3);
    }

    #[test]
    fn jobs_follow_first_appearance_of_namespace() {
        let batch = CudBatch::new(vec![
            insert(1, items(), 1),
            insert(2, orders(), 1),
            insert(3, items(), 2),
            Operation::delete(4, orders(), 7),
        ])
        .unwrap();

        let jobs: Vec<_> = batch.namespace_jobs().collect();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].namespace(), &items());
        assert_eq!(jobs[0].len(), 2);
        assert_eq!(jobs[1].namespace(), &orders());
        assert!(jobs[1].mutation(&DocumentId::from(7)).is_some());

        // derivation is repeatable
        assert_eq!(batch.namespace_jobs().count(), 2);
    }

    #[test]
    fn analyzed_batch_from_json() {
        let batch: AnalyzedBatch = serde_json::from_value(json!({
            "single": {"ts": 1, "op": "c", "ns": "shop.$cmd", "o": {"create": "orders"}}
        }))
        .unwrap();
        assert!(matches!(batch, AnalyzedBatch::Single(_)));
        assert_eq!(batch.last_operation().command_name(), Some("create"));

        let batch: AnalyzedBatch = serde_json::from_value(json!({
            "cud": [
                {"ts": 2, "op": "i", "ns": "shop.orders", "o": {"_id": 1, "qty": 2}},
                {"ts": 3, "op": "d", "ns": "shop.orders", "o": {"_id": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.last_operation().ts, 3);

        assert!(serde_json::from_value::<AnalyzedBatch>(json!({"cud": []})).is_err());
    }
}
