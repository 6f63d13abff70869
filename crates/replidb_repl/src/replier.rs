//! In-order replay of batches with checkpointing.

use crate::context::ApplierContext;
use crate::error::ReplResult;
use crate::executor::BatchExecutor;
use crate::{NamespaceJobExecutor, OperationApplier, Retrier};
use replidb_oplog::AnalyzedBatch;
use replidb_store::ConnectionProvider;
use tracing::{error, info};

/// What the replier does when a batch cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop and return the error.
    #[default]
    Halt,
    /// Log the error, count the batch as skipped and go on.
    SkipAndLog,
}

/// Counters kept by an [`OplogReplier`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplierStats {
    /// Batches applied and committed.
    pub batches_applied: u64,
    /// Source operations in the applied batches.
    pub operations_applied: u64,
    /// Batches skipped under [`FailurePolicy::SkipAndLog`].
    pub batches_skipped: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

/// Applies batches in order and tracks the timestamp of the last applied
/// operation.
///
/// The checkpoint only moves when a batch has fully committed; a skipped
/// batch leaves it where it was.
pub struct OplogReplier<S, A, J, R>
where
    S: ConnectionProvider,
    A: OperationApplier,
    J: NamespaceJobExecutor,
    R: Retrier,
{
    executor: BatchExecutor<S, A, J, R>,
    policy: FailurePolicy,
    checkpoint: Option<u64>,
    stats: ReplierStats,
}

impl<S, A, J, R> OplogReplier<S, A, J, R>
where
    S: ConnectionProvider,
    A: OperationApplier,
    J: NamespaceJobExecutor,
    R: Retrier,
{
    /// Creates a replier.
    pub fn new(executor: BatchExecutor<S, A, J, R>, policy: FailurePolicy) -> Self {
        Self {
            executor,
            policy,
            checkpoint: None,
            stats: ReplierStats::default(),
        }
    }

    /// Returns the executor.
    pub fn executor(&self) -> &BatchExecutor<S, A, J, R> {
        &self.executor
    }

    /// Returns the failure policy.
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Returns the timestamp of the last applied operation, if any.
    pub fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    /// Returns the counters.
    pub fn stats(&self) -> &ReplierStats {
        &self.stats
    }

    /// Applies one batch with a fresh context.
    ///
    /// Under [`FailurePolicy::SkipAndLog`] a failure is recorded and `Ok` is
    /// returned.
    pub fn apply_batch(&mut self, batch: &AnalyzedBatch) -> ReplResult<()> {
        match self.executor.apply(batch, &ApplierContext::default()) {
            Ok(last) => {
                self.checkpoint = Some(last.ts);
                self.stats.batches_applied += 1;
                self.stats.operations_applied += batch.len() as u64;
                Ok(())
            }
            Err(err) => {
                self.stats.last_error = Some(err.to_string());
                match self.policy {
                    FailurePolicy::Halt => Err(err),
                    FailurePolicy::SkipAndLog => {
                        error!(
                            last_ts = batch.last_operation().ts,
                            give_up = err.is_give_up(),
                            error = %err,
                            "skipping batch"
                        );
                        self.stats.batches_skipped += 1;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Applies `batches` in order, stopping at the first failure under
    /// [`FailurePolicy::Halt`].
    pub fn apply_batches<I>(&mut self, batches: I) -> ReplResult<()>
    where
        I: IntoIterator<Item = AnalyzedBatch>,
    {
        for batch in batches {
            self.apply_batch(&batch)?;
        }
        info!(
            applied = self.stats.batches_applied,
            skipped = self.stats.batches_skipped,
            checkpoint = ?self.checkpoint,
            "replay finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplConfig;
    use replidb_oplog::{Command, CudBatch, Namespace, Operation, SingleOpBatch};
    use replidb_store::MemoryServer;
    use serde_json::json;

    fn insert(ts: u64, id: i64) -> AnalyzedBatch {
        let doc = json!({"_id": id}).as_object().cloned().unwrap();
        let op = Operation::insert(ts, Namespace::new("db", "c"), doc).unwrap();
        AnalyzedBatch::Cud(CudBatch::new(vec![op]).unwrap())
    }

    fn unsupported(ts: u64) -> AnalyzedBatch {
        AnalyzedBatch::Single(SingleOpBatch::new(Operation::command(
            ts,
            "db",
            Command::Other {
                name: Some("compact".into()),
                document: Default::default(),
            },
        )))
    }

    #[test]
    fn halt_stops_at_failure() {
        let server = MemoryServer::new();
        let executor = BatchExecutor::new(server.clone(), ReplConfig::default());
        let mut replier = OplogReplier::new(executor, FailurePolicy::Halt);

        let err = replier
            .apply_batches(vec![insert(1, 1), unsupported(2), insert(3, 2)])
            .unwrap_err();

        assert!(!err.is_give_up());
        assert_eq!(replier.checkpoint(), Some(1));
        assert_eq!(replier.stats().batches_applied, 1);
        assert_eq!(server.count(&Namespace::new("db", "c")), 1);
    }

    #[test]
    fn skip_continues_without_moving_checkpoint() {
        let server = MemoryServer::new();
        let executor = BatchExecutor::new(server.clone(), ReplConfig::default());
        let mut replier = OplogReplier::new(executor, FailurePolicy::SkipAndLog);

        replier.apply_batches(vec![insert(1, 1), unsupported(2)]).unwrap();
        assert_eq!(replier.checkpoint(), Some(1));

        replier.apply_batches(vec![insert(3, 2)]).unwrap();
        assert_eq!(replier.checkpoint(), Some(3));

        let stats = replier.stats();
        assert_eq!(stats.batches_applied, 2);
        assert_eq!(stats.operations_applied, 2);
        assert_eq!(stats.batches_skipped, 1);
        assert_eq!(
            stats.last_error.as_deref(),
            Some("unsupported command compact")
        );
    }
}
