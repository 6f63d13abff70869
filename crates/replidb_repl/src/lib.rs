//! # ReplicaDB Replication
//!
//! Applies classified oplog batches to a transactional document store.
//!
//! This crate provides:
//! - [`BatchExecutor`]: transaction boundaries per batch kind, the
//!   optimistic to pessimistic fallback for namespace jobs, and
//!   re-application after write conflicts
//! - [`Retrier`] and [`SmartRetrier`]: bounded, hint-driven retries
//! - [`OperationApplier`] and [`NamespaceJobExecutor`]: the write paths
//! - [`OplogReplier`]: in-order replay with a checkpoint
//! - [`MetricsSink`]: timers, histograms and counters
//!
//! ## Key Invariants
//!
//! - Each applied unit commits atomically or not at all
//! - A unit re-applied after a write conflict converges to the same state
//! - The last operation of a batch is returned only after every unit of
//!   the batch has committed
//! - A uniqueness conflict escalates a job to pessimistic mode at most once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod context;
mod error;
mod executor;
mod job_executor;
pub mod metrics;
mod replier;
mod retrier;

pub use applier::{DefaultOperationApplier, OperationApplier};
pub use config::{InitialJobMode, ReplConfig, RetryConfig};
pub use context::{ApplierContext, ApplierContextBuilder};
pub use error::{ReplError, ReplResult};
pub use executor::BatchExecutor;
pub use job_executor::{DefaultNamespaceJobExecutor, NamespaceJobExecutor};
pub use metrics::{InMemoryMetrics, MetricsSink, TimerGuard, TimerSummary, TracingMetrics};
pub use replier::{FailurePolicy, OplogReplier, ReplierStats};
pub use retrier::{AttemptError, RetryError, RetryHint, Retrier, SmartRetrier};

/// Version of the replication engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
