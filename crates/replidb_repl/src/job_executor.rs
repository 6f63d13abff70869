//! Application of one namespace job inside a write transaction.

use crate::context::ApplierContext;
use crate::error::ReplResult;
use replidb_oplog::{Document, DocumentId, DocumentMutation, NamespaceJob};
use replidb_store::WriteTransaction;
use tracing::trace;

/// Applies a namespace job inside an open, non-exclusive transaction.
///
/// An optimistic attempt may fail with [`ReplError::UniquenessConflict`];
/// the caller then discards the transaction and retries pessimistically.
///
/// [`ReplError::UniquenessConflict`]: crate::ReplError::UniquenessConflict
pub trait NamespaceJobExecutor: Send + Sync {
    /// Applies `job` to `txn`. Never commits.
    fn apply(
        &self,
        job: &NamespaceJob,
        txn: &mut dyn WriteTransaction,
        context: &ApplierContext,
        optimistic: bool,
    ) -> ReplResult<()>;
}

/// Job executor writing the net effect of each document mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNamespaceJobExecutor;

impl DefaultNamespaceJobExecutor {
    /// Creates a job executor.
    pub fn new() -> Self {
        Self
    }

    /// Blind deletes followed by raw inserts.
    ///
    /// Only patch targets are read. Any document that already holds an
    /// inserted `_id` or unique key surfaces as a uniqueness conflict.
    fn apply_optimistic(
        &self,
        job: &NamespaceJob,
        txn: &mut dyn WriteTransaction,
        context: &ApplierContext,
    ) -> ReplResult<()> {
        let namespace = job.namespace();
        let mut deletes: Vec<&DocumentId> = Vec::new();
        let mut inserts: Vec<Document> = Vec::new();

        for (id, mutation) in job.mutations() {
            let current = if mutation.needs_current_image() {
                txn.find(namespace, id)?
            } else {
                None
            };
            if !matches!(mutation, DocumentMutation::Insert(_)) {
                deletes.push(id);
            }
            match mutation.resolve(id, current.as_ref(), context.updates_as_upserts()) {
                Some(image) => inserts.push(image),
                None if mutation.needs_current_image() => {
                    trace!(%namespace, %id, "patch of missing document ignored")
                }
                None => {}
            }
        }

        for id in deletes {
            txn.delete(namespace, id)?;
        }
        for image in inserts {
            txn.insert(namespace, image)?;
        }
        Ok(())
    }

    /// Reads every touched document, deletes the ones that exist and writes
    /// the final images.
    fn apply_pessimistic(
        &self,
        job: &NamespaceJob,
        txn: &mut dyn WriteTransaction,
        context: &ApplierContext,
    ) -> ReplResult<()> {
        let namespace = job.namespace();
        let mut deletes: Vec<&DocumentId> = Vec::new();
        let mut images: Vec<Document> = Vec::new();

        for (id, mutation) in job.mutations() {
            let current = txn.find(namespace, id)?;
            let image = mutation.resolve(id, current.as_ref(), context.updates_as_upserts());
            if current.is_some() {
                deletes.push(id);
            }
            match image {
                Some(image) => images.push(image),
                None if current.is_none() && mutation.needs_current_image() => {
                    trace!(%namespace, %id, "patch of missing document ignored")
                }
                None => {}
            }
        }

        for id in deletes {
            txn.delete(namespace, id)?;
        }
        for image in images {
            txn.upsert(namespace, image)?;
        }
        Ok(())
    }
}

impl NamespaceJobExecutor for DefaultNamespaceJobExecutor {
    fn apply(
        &self,
        job: &NamespaceJob,
        txn: &mut dyn WriteTransaction,
        context: &ApplierContext,
        optimistic: bool,
    ) -> ReplResult<()> {
        trace!(
            namespace = %job.namespace(),
            documents = job.len(),
            operations = job.operation_count(),
            optimistic,
            "applying namespace job"
        );
        if optimistic {
            self.apply_optimistic(job, txn, context)
        } else {
            self.apply_pessimistic(job, txn, context)
        }
    }
}
