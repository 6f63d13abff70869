//! Replay command implementation.

use replidb_oplog::{AnalyzedBatch, Document};
use replidb_repl::metrics::{UNIQUENESS_FALLBACKS, WRITE_CONFLICT_RETRIES};
use replidb_repl::{
    BatchExecutor, FailurePolicy, InMemoryMetrics, OplogReplier, ReplConfig, ReplError,
    RetryConfig,
};
use replidb_store::MemoryServer;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors reading a batch file.
#[derive(Error, Debug)]
pub enum BatchFileError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not a valid batch.
    #[error("line {line}: {source}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Replay result.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Input file.
    pub input: String,
    /// Batches read from the input.
    pub batches_read: usize,
    /// Timestamp of the last applied operation.
    pub checkpoint: Option<u64>,
    /// Batches applied.
    pub batches_applied: u64,
    /// Operations in the applied batches.
    pub operations_applied: u64,
    /// Batches skipped.
    pub batches_skipped: u64,
    /// Namespace jobs re-run pessimistically.
    pub uniqueness_fallbacks: u64,
    /// Batches re-applied after a write conflict.
    pub write_conflict_retries: u64,
    /// Most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Final state of each collection.
    pub collections: Vec<CollectionReport>,
}

/// Final state of one collection.
#[derive(Debug, Serialize)]
pub struct CollectionReport {
    /// Namespace of the collection.
    pub namespace: String,
    /// Number of documents.
    pub count: usize,
    /// Documents, when dumped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Document>>,
}

/// Reads one batch per non-empty line.
pub fn read_batches(path: &Path) -> Result<Vec<AnalyzedBatch>, BatchFileError> {
    let text = fs::read_to_string(path).map_err(|source| BatchFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| BatchFileError::Parse {
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Replays `input` against a fresh in-memory store.
///
/// Returns the report and, under [`FailurePolicy::Halt`], the error that
/// stopped the replay.
pub fn replay(
    input: &Path,
    max_attempts: u32,
    policy: FailurePolicy,
    dump: bool,
) -> Result<(ReplayReport, Option<ReplError>), BatchFileError> {
    let batches = read_batches(input)?;
    let batches_read = batches.len();

    let server = MemoryServer::new();
    let metrics = Arc::new(InMemoryMetrics::new());
    let config = ReplConfig::default().with_retry(RetryConfig::new(max_attempts));
    let executor =
        BatchExecutor::new(server.clone(), config).with_metrics(metrics.clone());
    let mut replier = OplogReplier::new(executor, policy);

    info!(input = %input.display(), batches = batches_read, "replaying");
    let failure = replier.apply_batches(batches).err();

    let stats = replier.stats().clone();
    let collections = server
        .collections()
        .into_iter()
        .map(|namespace| CollectionReport {
            count: server.count(&namespace),
            documents: dump.then(|| server.documents(&namespace)),
            namespace: namespace.to_string(),
        })
        .collect();

    let report = ReplayReport {
        input: input.display().to_string(),
        batches_read,
        checkpoint: replier.checkpoint(),
        batches_applied: stats.batches_applied,
        operations_applied: stats.operations_applied,
        batches_skipped: stats.batches_skipped,
        uniqueness_fallbacks: metrics.counter(UNIQUENESS_FALLBACKS),
        write_conflict_retries: metrics.counter(WRITE_CONFLICT_RETRIES),
        last_error: stats.last_error,
        collections,
    };
    Ok((report, failure))
}

/// Runs the replay command.
pub fn run(
    input: &Path,
    max_attempts: u32,
    policy: FailurePolicy,
    format: &str,
    dump: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (report, failure) = replay(input, max_attempts, policy, dump)?;

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_text_output(report: &ReplayReport) {
    println!("ReplicaDB Replay");
    println!("================");
    println!();
    println!("Input: {}", report.input);
    println!();
    println!("Batches:");
    println!("  Read:     {}", report.batches_read);
    println!("  Applied:  {}", report.batches_applied);
    println!("  Skipped:  {}", report.batches_skipped);
    println!("  Operations applied: {}", report.operations_applied);
    match report.checkpoint {
        Some(ts) => println!("  Checkpoint: {ts}"),
        None => println!("  Checkpoint: none"),
    }
    println!();
    println!("Recovery:");
    println!("  Uniqueness fallbacks:   {}", report.uniqueness_fallbacks);
    println!("  Write conflict retries: {}", report.write_conflict_retries);
    if let Some(err) = &report.last_error {
        println!("  Last error: {err}");
    }

    println!();
    println!("Collections:");
    for collection in &report.collections {
        println!("  {} ({} documents)", collection.namespace, collection.count);
        for doc in collection.documents.iter().flatten() {
            println!("    {}", serde_json::Value::Object(doc.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replidb_testkit::BatchFile;

    const SHOP: [&str; 3] = [
        r#"{"single": {"ts": 1, "op": "c", "ns": "shop.$cmd", "o": {"create": "orders"}}}"#,
        r#"{"cud": [{"ts": 2, "op": "i", "ns": "shop.orders", "o": {"_id": 1, "qty": 2}}, {"ts": 3, "op": "u", "ns": "shop.orders", "o2": {"_id": 1}, "o": {"$set": {"qty": 3}}}, {"ts": 4, "op": "i", "ns": "shop.orders", "o": {"_id": 2}}]}"#,
        r#"{"cud": [{"ts": 5, "op": "d", "ns": "shop.orders", "o": {"_id": 2}}]}"#,
    ];

    #[test]
    fn reads_batches_and_skips_blank_lines() {
        let file = BatchFile::from_lines(&[SHOP[0], "", SHOP[1]]);
        let batches = read_batches(file.path()).unwrap();

        assert_eq!(batches.len(), 2);
        assert!(matches!(batches[0], AnalyzedBatch::Single(_)));
        assert_eq!(batches[1].len(), 3);
    }

    #[test]
    fn reports_line_of_malformed_batch() {
        let file = BatchFile::from_lines(&[SHOP[0], r#"{"cud": []}"#]);
        let err = read_batches(file.path()).unwrap_err();

        assert!(matches!(err, BatchFileError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn missing_file() {
        let err = read_batches(Path::new("/nonexistent/batches.jsonl")).unwrap_err();
        assert!(matches!(err, BatchFileError::Io { .. }));
    }

    #[test]
    fn replays_file() {
        let file = BatchFile::from_lines(&SHOP);
        let (report, failure) = replay(file.path(), 3, FailurePolicy::Halt, true).unwrap();

        assert!(failure.is_none());
        assert_eq!(report.checkpoint, Some(5));
        assert_eq!(report.batches_applied, 3);
        assert_eq!(report.operations_applied, 5);
        assert_eq!(report.collections.len(), 1);
        assert_eq!(report.collections[0].namespace, "shop.orders");
        assert_eq!(
            report.collections[0].documents,
            Some(vec![serde_json::json!({"_id": 1, "qty": 3})
                .as_object()
                .cloned()
                .unwrap()])
        );
    }

    #[test]
    fn failure_policies() {
        let lines = [
            SHOP[0],
            r#"{"single": {"ts": 2, "op": "c", "ns": "shop.$cmd", "o": {"create": "orders"}}}"#,
            SHOP[2],
        ];
        let file = BatchFile::from_lines(&lines);

        let (report, failure) = replay(file.path(), 3, FailurePolicy::Halt, false).unwrap();
        assert!(failure.is_some());
        assert_eq!(report.checkpoint, Some(1));
        assert_eq!(report.batches_applied, 1);

        let (report, failure) =
            replay(file.path(), 3, FailurePolicy::SkipAndLog, false).unwrap();
        assert!(failure.is_none());
        assert_eq!(report.checkpoint, Some(5));
        assert_eq!(report.batches_skipped, 1);
        assert!(report.last_error.unwrap().contains("already exists"));
        assert!(report.collections[0].documents.is_none());
    }
}
