//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use replidb_oplog::{AnalyzedBatch, Document, Modification, Namespace, Operation, OplogResult};
use serde_json::{json, Value};

/// Database used by generated batches.
pub const DATABASE: &str = "bench";

fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Generates a CUD batch of `count` operations over `namespaces`
/// collections.
///
/// The first touch of every id is an insert; later touches are `$set`
/// updates and, rarely, deletes. Each id is touched about `touches` times.
pub fn generate_cud_operations(
    count: usize,
    namespaces: usize,
    touches: usize,
) -> OplogResult<Vec<Operation>> {
    let mut rng = rand::thread_rng();
    let ids = (count / touches.max(1)).max(1) as i64;
    let mut seen = std::collections::HashSet::new();

    (0..count)
        .map(|i| {
            let ts = i as u64 + 1;
            let collection = format!("c{}", rng.gen_range(0..namespaces.max(1)));
            let namespace = Namespace::new(DATABASE, collection);
            let id = rng.gen_range(0..ids);

            if seen.insert((namespace.clone(), id)) {
                let doc = document(json!({"_id": id, "n": 0, "payload": "x".repeat(64)}));
                return Operation::insert(ts, namespace, doc);
            }
            if rng.gen_bool(0.1) {
                seen.remove(&(namespace.clone(), id));
                return Ok(Operation::delete(ts, namespace, id));
            }
            let set = Modification::set(document(json!({"n": i})));
            Ok(Operation::update(ts, namespace, id, set, false))
        })
        .collect()
}

/// Wraps generated operations in a CUD batch.
///
/// # Panics
///
/// Panics if `count` is zero.
pub fn generate_cud_batch(count: usize, namespaces: usize, touches: usize) -> AnalyzedBatch {
    generate_cud_operations(count, namespaces, touches)
        .and_then(AnalyzedBatch::cud)
        .expect("Generated operations form a CUD batch")
}
