//! Batch execution: transaction boundaries, uniqueness fallback and
//! write-conflict recovery.

use crate::applier::{DefaultOperationApplier, OperationApplier};
use crate::config::ReplConfig;
use crate::context::ApplierContext;
use crate::error::{ReplError, ReplResult};
use crate::job_executor::{DefaultNamespaceJobExecutor, NamespaceJobExecutor};
use crate::metrics::{
    MetricsSink, TimerGuard, TracingMetrics, CUD_BATCH_SIZE, CUD_TIMER, NAMESPACE_TIMER,
    SINGLE_PREFIX, UNIQUENESS_FALLBACKS, WRITE_CONFLICT_RETRIES,
};
use crate::retrier::{AttemptError, RetryHint, Retrier, SmartRetrier};
use replidb_oplog::{AnalyzedBatch, CudBatch, NamespaceJob, Operation, OperationBody};
use replidb_store::{Connection, ConnectionProvider, WriteTransaction};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Hints passed to the retrier when a unit is re-applied.
const REAPPLY_HINTS: [RetryHint; 2] = [RetryHint::Critical, RetryHint::TimeSensible];

/// Applies analyzed batches to a store.
///
/// A single-operation batch runs in one exclusive transaction. A CUD batch
/// runs one non-exclusive transaction per namespace job, in order. A job
/// that hits a uniqueness conflict optimistically is re-run once in
/// pessimistic mode; a write conflict re-applies the whole batch through
/// the retrier with a reapplying context.
///
/// The executor keeps no per-call state and may be shared across threads.
pub struct BatchExecutor<
    S: ConnectionProvider,
    A: OperationApplier = DefaultOperationApplier,
    J: NamespaceJobExecutor = DefaultNamespaceJobExecutor,
    R: Retrier = SmartRetrier,
> {
    config: ReplConfig,
    provider: Arc<S>,
    applier: Arc<A>,
    job_executor: Arc<J>,
    retrier: Arc<R>,
    metrics: Arc<dyn MetricsSink>,
}

impl<S: ConnectionProvider> BatchExecutor<S> {
    /// Creates an executor with the default collaborators.
    ///
    /// The retrier follows `config.retry` and metrics go to
    /// [`TracingMetrics`].
    pub fn new(provider: S, config: ReplConfig) -> Self {
        let retrier = SmartRetrier::new(config.retry.clone());
        Self::with_parts(
            config,
            Arc::new(provider),
            Arc::new(DefaultOperationApplier::new()),
            Arc::new(DefaultNamespaceJobExecutor::new()),
            Arc::new(retrier),
        )
    }
}

impl<S, A, J, R> BatchExecutor<S, A, J, R>
where
    S: ConnectionProvider,
    A: OperationApplier,
    J: NamespaceJobExecutor,
    R: Retrier,
{
    /// Creates an executor from explicit collaborators.
    pub fn with_parts(
        config: ReplConfig,
        provider: Arc<S>,
        applier: Arc<A>,
        job_executor: Arc<J>,
        retrier: Arc<R>,
    ) -> Self {
        Self {
            config,
            provider,
            applier,
            job_executor,
            retrier,
            metrics: Arc::new(TracingMetrics),
        }
    }

    /// Replaces the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplConfig {
        &self.config
    }

    /// Returns the connection provider.
    pub fn provider(&self) -> &Arc<S> {
        &self.provider
    }

    /// Applies `batch` and returns its last operation once every unit of
    /// the batch has committed.
    ///
    /// Non-conflict failures of the first attempt are returned as they are.
    /// A write conflict hands the batch to the retrier; if that does not
    /// succeed the result is [`ReplError::GiveUp`].
    pub fn apply<'b>(
        &self,
        batch: &'b AnalyzedBatch,
        context: &ApplierContext,
    ) -> ReplResult<&'b Operation> {
        match self.execute(batch, context) {
            Ok(()) => Ok(batch.last_operation()),
            Err(ReplError::WriteConflict(cause)) => {
                warn!(
                    last_ts = batch.last_operation().ts,
                    operations = batch.len(),
                    %cause,
                    "write conflict, re-applying batch"
                );
                self.metrics.increment(WRITE_CONFLICT_RETRIES);
                self.reapply(batch)
            }
            Err(err) => Err(err),
        }
    }

    fn reapply<'b>(&self, batch: &'b AnalyzedBatch) -> ReplResult<&'b Operation> {
        let context = ApplierContext::for_reapply();
        let result = self.retrier.retry(
            |attempt| {
                debug!(attempt, "re-applying batch");
                self.execute(batch, &context).map_err(|err| {
                    if err.is_write_conflict() {
                        AttemptError::Retry(err)
                    } else {
                        AttemptError::Abort(err)
                    }
                })
            },
            &REAPPLY_HINTS,
        );

        match result {
            Ok(()) => Ok(batch.last_operation()),
            Err(err) => {
                let attempts = err.attempts();
                let aborted = err.is_aborted();
                let cause = err.into_error();
                error!(
                    last_ts = batch.last_operation().ts,
                    attempts,
                    aborted,
                    %cause,
                    "giving up on batch"
                );
                Err(ReplError::GiveUp {
                    attempts,
                    aborted,
                    cause: Box::new(cause),
                })
            }
        }
    }

    fn execute(&self, batch: &AnalyzedBatch, context: &ApplierContext) -> ReplResult<()> {
        match batch {
            AnalyzedBatch::Single(single) => self.execute_single(single.operation(), context),
            AnalyzedBatch::Cud(cud) => self.execute_cud(cud, context),
        }
    }

    /// Applies one operation in its own exclusive transaction.
    pub fn execute_single(&self, operation: &Operation, context: &ApplierContext) -> ReplResult<()> {
        let _timer = TimerGuard::start(
            self.metrics.as_ref(),
            format!("{SINGLE_PREFIX}{}", single_key(operation)),
        );

        let conn = self.provider.open_connection()?;
        let mut txn = conn.open_exclusive_write_transaction()?;
        self.applier.apply(operation, &mut txn, context)?;
        txn.commit()?;
        Ok(())
    }

    /// Applies every namespace job of `batch`, each in its own write
    /// transaction, on one connection.
    pub fn execute_cud(&self, batch: &CudBatch, context: &ApplierContext) -> ReplResult<()> {
        let _timer = TimerGuard::start(self.metrics.as_ref(), CUD_TIMER);
        self.metrics
            .record_histogram(CUD_BATCH_SIZE, batch.len() as u64);

        let conn = self.provider.open_connection()?;
        for job in batch.namespace_jobs() {
            self.execute_job(&conn, &job, context)?;
        }
        Ok(())
    }

    fn execute_job(
        &self,
        conn: &S::Connection,
        job: &NamespaceJob,
        context: &ApplierContext,
    ) -> ReplResult<()> {
        let _timer = TimerGuard::start(self.metrics.as_ref(), NAMESPACE_TIMER);
        let optimistic = self
            .config
            .initial_job_mode
            .starts_optimistic(context.reapplying());

        let result = match self.attempt_job(conn, job, context, optimistic) {
            Err(ReplError::UniquenessConflict(cause)) if optimistic => {
                debug!(
                    namespace = %job.namespace(),
                    %cause,
                    "uniqueness conflict, re-running job pessimistically"
                );
                self.metrics.increment(UNIQUENESS_FALLBACKS);
                self.attempt_job(conn, job, context, false)
            }
            other => other,
        };

        match result {
            Err(ReplError::UniquenessConflict(cause)) => Err(ReplError::namespace_job(
                job.namespace(),
                format!("uniqueness conflict in pessimistic mode: {cause}"),
            )),
            other => other,
        }
    }

    /// Runs one job in a fresh transaction. The transaction rolls back on
    /// drop unless the job and the commit succeed.
    fn attempt_job(
        &self,
        conn: &S::Connection,
        job: &NamespaceJob,
        context: &ApplierContext,
        optimistic: bool,
    ) -> ReplResult<()> {
        let mut txn = conn.open_write_transaction()?;
        self.job_executor
            .apply(job, &mut txn, context, optimistic)?;
        txn.commit()?;
        Ok(())
    }
}

/// Timer key of a single-operation batch.
fn single_key(operation: &Operation) -> &str {
    match &operation.body {
        OperationBody::Command(_) => operation.command_name().unwrap_or("unknown_cmd"),
        _ => operation.kind().as_str(),
    }
}
