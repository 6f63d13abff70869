//! # ReplicaDB Oplog
//!
//! Oplog model for the ReplicaDB replier.
//!
//! This crate provides:
//! - [`Operation`] for replicated inserts, updates, deletes and commands
//! - [`AnalyzedBatch`] for classified units (single operation or CUD run)
//! - [`NamespaceJob`] for the net per-collection effect of a CUD batch
//! - JSON encoding of oplog entries and batches
//!
//! This is a pure model crate with no I/O operations.
//!
//! ## Merging
//!
//! A CUD batch is decomposed into one job per namespace. Within a job,
//! every operation on the same document is folded into a single
//! [`DocumentMutation`], so applying the jobs in order has the same effect
//! as applying the original operations in order.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod job;
mod namespace;
mod operation;

pub use batch::{AnalyzedBatch, CudBatch, SingleOpBatch};
pub use error::{OplogError, OplogResult};
pub use job::{DocumentMutation, NamespaceJob, PatchStep};
pub use namespace::{Document, DocumentId, Namespace, COMMAND_COLLECTION, ID_FIELD};
pub use operation::{Command, Modification, Operation, OperationBody, OperationKind};
