//! Test fixtures: builders for documents and operations, seeded stores and
//! batch files.

use replidb_oplog::{AnalyzedBatch, Command, Document, DocumentId, Modification, Namespace, Operation};
use replidb_store::{Connection, ConnectionProvider, MemoryServer, WriteTransaction};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Converts a JSON object literal into a document.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Parses a `database.collection` namespace.
///
/// # Panics
///
/// Panics if `text` is not a valid namespace.
pub fn ns(text: &str) -> Namespace {
    text.parse().expect("Invalid namespace")
}

/// Builds an insert operation.
pub fn insert_op(ts: u64, namespace: &str, value: Value) -> Operation {
    Operation::insert(ts, ns(namespace), document(value)).expect("Insert needs an _id")
}

/// Builds a `$set` update operation.
pub fn set_op(ts: u64, namespace: &str, id: i64, fields: Value, upsert: bool) -> Operation {
    Operation::update(
        ts,
        ns(namespace),
        id,
        Modification::set(document(fields)),
        upsert,
    )
}

/// Builds a replacement update operation.
pub fn replace_op(ts: u64, namespace: &str, id: i64, value: Value, upsert: bool) -> Operation {
    Operation::update(
        ts,
        ns(namespace),
        id,
        Modification::Replace(document(value)),
        upsert,
    )
}

/// Builds a delete operation.
pub fn delete_op(ts: u64, namespace: &str, id: i64) -> Operation {
    Operation::delete(ts, ns(namespace), id)
}

/// Builds a command operation.
pub fn command_op(ts: u64, database: &str, command: Command) -> Operation {
    Operation::command(ts, database, command)
}

/// Builds a CUD batch.
///
/// # Panics
///
/// Panics if `operations` is empty or holds a command.
pub fn cud_batch(operations: Vec<Operation>) -> AnalyzedBatch {
    AnalyzedBatch::cud(operations).expect("Invalid CUD batch")
}

/// Creates a store holding `documents`, committed in one transaction.
pub fn seeded_server<I>(documents: I) -> MemoryServer
where
    I: IntoIterator<Item = (Namespace, Document)>,
{
    let server = MemoryServer::new();
    {
        let conn = server.open_connection().expect("Failed to open connection");
        let mut txn = conn
            .open_write_transaction()
            .expect("Failed to open transaction");
        for (namespace, doc) in documents {
            txn.upsert(&namespace, doc).expect("Failed to seed document");
        }
        txn.commit().expect("Failed to commit seed data");
    }
    server
}

/// Returns every committed document of the store, keyed by namespace and id.
pub fn store_contents(server: &MemoryServer) -> BTreeMap<(Namespace, DocumentId), Document> {
    server
        .collections()
        .into_iter()
        .flat_map(|namespace| {
            server
                .documents(&namespace)
                .into_iter()
                .filter_map(move |doc| DocumentId::of(&doc).map(|id| ((namespace.clone(), id), doc)))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// A temporary file of JSON lines, one batch per line.
pub struct BatchFile {
    file: NamedTempFile,
}

impl BatchFile {
    /// Writes `batches` to a new temporary file.
    pub fn new(batches: &[AnalyzedBatch]) -> Self {
        let lines: Vec<String> = batches
            .iter()
            .map(|batch| serde_json::to_string(batch).expect("Failed to encode batch"))
            .collect();
        Self::from_lines(&lines)
    }

    /// Writes raw lines to a new temporary file.
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        for line in lines {
            writeln!(file, "{}", line.as_ref()).expect("Failed to write batch file");
        }
        file.flush().expect("Failed to flush batch file");
        Self { file }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seeded_server_contents() {
        let server = seeded_server([
            (ns("shop.orders"), document(json!({"_id": 1}))),
            (ns("shop.items"), document(json!({"_id": "a"}))),
        ]);

        let contents = store_contents(&server);
        assert_eq!(contents.len(), 2);
        assert!(contents.contains_key(&(ns("shop.items"), DocumentId::from("a"))));
    }

    #[test]
    fn batch_file_round_trips_lines() {
        let file = BatchFile::new(&[cud_batch(vec![insert_op(1, "shop.orders", json!({"_id": 1}))])]);
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("{\"cud\":"));
    }
}
