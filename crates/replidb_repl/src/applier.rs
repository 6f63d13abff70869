//! Application of a single operation inside an exclusive transaction.

use crate::context::ApplierContext;
use crate::error::{ReplError, ReplResult};
use replidb_oplog::{Command, Namespace, Operation, OperationBody};
use replidb_store::{ExclusiveWriteTransaction, IndexSpec, StoreError};
use tracing::{debug, trace};

/// Applies one operation inside an open exclusive transaction.
///
/// Implementations never commit; the caller owns the transaction.
pub trait OperationApplier: Send + Sync {
    /// Applies `operation` to `txn`.
    fn apply(
        &self,
        operation: &Operation,
        txn: &mut dyn ExclusiveWriteTransaction,
        context: &ApplierContext,
    ) -> ReplResult<()>;
}

/// Applier for the supported document operations and commands.
///
/// A single operation has no optimistic mode to fall back from, so a
/// duplicate key here is a domain error rather than a uniqueness conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOperationApplier;

impl DefaultOperationApplier {
    /// Creates an applier.
    pub fn new() -> Self {
        Self
    }

    fn apply_command(
        &self,
        database: &str,
        command: &Command,
        txn: &mut dyn ExclusiveWriteTransaction,
        context: &ApplierContext,
    ) -> ReplResult<()> {
        debug!(database, command = command.name().unwrap_or("unknown"), "applying command");

        match command {
            Command::Create { collection } => {
                let namespace = Namespace::new(database, collection);
                let created = txn.create_collection(&namespace).map_err(single_error)?;
                if !created && !context.is_reapplying() {
                    return Err(ReplError::domain(format!(
                        "collection {namespace} already exists"
                    )));
                }
            }
            Command::Drop { collection } => {
                let namespace = Namespace::new(database, collection);
                match txn.drop_collection(&namespace) {
                    Ok(()) | Err(StoreError::CollectionNotFound { .. }) => {}
                    Err(err) => return Err(single_error(err)),
                }
            }
            Command::DropDatabase => {
                let dropped = txn.drop_database(database).map_err(single_error)?;
                trace!(database, dropped, "database dropped");
            }
            Command::CreateIndex {
                collection,
                name,
                field,
                unique,
            } => {
                let namespace = Namespace::new(database, collection);
                let index = IndexSpec {
                    name: name.clone(),
                    field: field.clone(),
                    unique: *unique,
                };
                txn.create_index(&namespace, index).map_err(single_error)?;
            }
            Command::DropIndex { collection, name } => {
                let namespace = Namespace::new(database, collection);
                match txn.drop_index(&namespace, name) {
                    Ok(())
                    | Err(StoreError::CollectionNotFound { .. })
                    | Err(StoreError::IndexNotFound { .. }) => {}
                    Err(err) => return Err(single_error(err)),
                }
            }
            Command::Other { name, .. } => {
                return Err(ReplError::domain(format!(
                    "unsupported command {}",
                    name.as_deref().unwrap_or("<empty>")
                )));
            }
        }
        Ok(())
    }
}

/// Maps a store error of a single-operation unit.
fn single_error(err: StoreError) -> ReplError {
    match err {
        StoreError::UniqueIndexViolation { .. } => {
            ReplError::domain_from(format!("cannot apply operation: {err}"), err)
        }
        other => other.into(),
    }
}

impl OperationApplier for DefaultOperationApplier {
    fn apply(
        &self,
        operation: &Operation,
        txn: &mut dyn ExclusiveWriteTransaction,
        context: &ApplierContext,
    ) -> ReplResult<()> {
        let namespace = &operation.namespace;

        match &operation.body {
            OperationBody::Insert { document, .. } => {
                if context.updates_as_upserts() {
                    txn.upsert(namespace, document.clone())
                        .map_err(single_error)?;
                } else {
                    txn.insert(namespace, document.clone())
                        .map_err(single_error)?;
                }
            }
            OperationBody::Update {
                id,
                modification,
                upsert,
            } => match txn.find(namespace, id).map_err(single_error)? {
                Some(current) => {
                    txn.upsert(namespace, modification.apply(id, &current))
                        .map_err(single_error)?;
                }
                None if *upsert || context.updates_as_upserts() => {
                    txn.upsert(namespace, modification.apply(id, &id.seed_document()))
                        .map_err(single_error)?;
                }
                None => trace!(%namespace, %id, "update of missing document ignored"),
            },
            OperationBody::Delete { id } => {
                txn.delete(namespace, id).map_err(single_error)?;
            }
            OperationBody::Command(command) => {
                self.apply_command(namespace.database(), command, txn, context)?;
            }
            OperationBody::Noop => {}
        }
        Ok(())
    }
}
