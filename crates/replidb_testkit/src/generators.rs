//! Property-based test generators using proptest.
//!
//! Operation sequences are built against a running model of which documents
//! exist, so they look like a real source oplog: inserts only target absent
//! documents and writes to existing documents are updates.

use replidb_oplog::{Document, DocumentId, Modification, Namespace, Operation};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::HashSet;

/// Collections the generators spread operations over.
pub const COLLECTIONS: [&str; 3] = ["c0", "c1", "c2"];

/// Database of every generated namespace.
pub const DATABASE: &str = "test";

const FIELDS: [&str; 3] = ["a", "b", "c"];

/// Number of distinct document ids per collection.
pub const ID_SPACE: i64 = 6;

fn namespace_at(index: usize) -> Namespace {
    Namespace::new(DATABASE, COLLECTIONS[index % COLLECTIONS.len()])
}

/// Strategy for generating one of the test namespaces.
pub fn namespace_strategy() -> impl Strategy<Value = Namespace> {
    (0..COLLECTIONS.len()).prop_map(namespace_at)
}

/// Strategy for generating a small set of top-level fields.
pub fn fields_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(prop::sample::select(FIELDS.to_vec()), -100i64..100, 1..3)
        .prop_map(|fields| {
            fields
                .into_iter()
                .map(|(field, value)| (field.to_string(), Value::from(value)))
                .collect()
        })
}

/// Strategy for generating update modifications.
pub fn modification_strategy() -> impl Strategy<Value = Modification> {
    prop_oneof![
        3 => fields_strategy().prop_map(Modification::set),
        1 => prop::collection::vec(prop::sample::select(FIELDS.to_vec()), 1..3)
            .prop_map(Modification::unset),
        1 => fields_strategy().prop_map(Modification::Replace),
    ]
}

#[derive(Debug, Clone)]
enum Intent {
    Write(Document),
    Update(Modification, bool),
    Delete,
}

fn intent_strategy() -> impl Strategy<Value = Intent> {
    prop_oneof![
        2 => fields_strategy().prop_map(Intent::Write),
        2 => (modification_strategy(), any::<bool>()).prop_map(|(m, upsert)| Intent::Update(m, upsert)),
        1 => Just(Intent::Delete),
    ]
}

/// Strategy for generating documents already present before replay.
pub fn seed_documents_strategy() -> impl Strategy<Value = Vec<(Namespace, Document)>> {
    prop::collection::btree_map((0..COLLECTIONS.len(), 0..ID_SPACE), fields_strategy(), 0..8)
        .prop_map(|docs| {
            docs.into_iter()
                .map(|((index, id), mut doc)| {
                    doc.insert("_id".into(), Value::from(id));
                    (namespace_at(index), doc)
                })
                .collect()
        })
}

fn build_operations(
    seed: &[(Namespace, Document)],
    intents: Vec<(usize, i64, Intent)>,
) -> Vec<Operation> {
    let mut existing: HashSet<(Namespace, DocumentId)> = seed
        .iter()
        .filter_map(|(namespace, doc)| DocumentId::of(doc).map(|id| (namespace.clone(), id)))
        .collect();

    intents
        .into_iter()
        .enumerate()
        .map(|(i, (index, id, intent))| {
            let ts = i as u64 + 1;
            let namespace = namespace_at(index);
            let key = (namespace.clone(), DocumentId::from(id));

            match intent {
                Intent::Write(fields) if existing.contains(&key) => {
                    Operation::update(ts, namespace, id, Modification::Replace(fields), false)
                }
                Intent::Write(mut fields) => {
                    existing.insert(key);
                    fields.insert("_id".into(), Value::from(id));
                    Operation::insert(ts, namespace, fields).expect("Generated document has an _id")
                }
                Intent::Update(modification, upsert) => {
                    if upsert {
                        existing.insert(key);
                    }
                    Operation::update(ts, namespace, id, modification, upsert)
                }
                Intent::Delete => {
                    existing.remove(&key);
                    Operation::delete(ts, namespace, id)
                }
            }
        })
        .collect()
}

/// Strategy for generating a valid CUD operation sequence against an empty
/// store.
pub fn cud_operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(
        (0..COLLECTIONS.len(), 0..ID_SPACE, intent_strategy()),
        1..=max_len.max(1),
    )
    .prop_map(|intents| build_operations(&[], intents))
}

/// Strategy for generating seed documents plus a valid CUD operation
/// sequence against them.
pub fn cud_scenario_strategy(
    max_len: usize,
) -> impl Strategy<Value = (Vec<(Namespace, Document)>, Vec<Operation>)> {
    (
        seed_documents_strategy(),
        prop::collection::vec(
            (0..COLLECTIONS.len(), 0..ID_SPACE, intent_strategy()),
            1..=max_len.max(1),
        ),
    )
        .prop_map(|(seed, intents)| {
            let operations = build_operations(&seed, intents);
            (seed, operations)
        })
}
