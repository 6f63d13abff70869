//! Integration tests for the in-memory reference store.

use proptest::prelude::*;
use replidb_oplog::{Document, DocumentId, Namespace};
use replidb_store::{
    Connection, ConnectionProvider, ExclusiveWriteTransaction, IndexSpec, MemoryServer,
    StoreError, WriteTransaction,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn orders() -> Namespace {
    Namespace::new("shop", "orders")
}

fn doc(id: i64, qty: i64) -> Document {
    json!({"_id": id, "qty": qty}).as_object().cloned().unwrap()
}

#[test]
fn commit_makes_writes_visible() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut txn = conn.open_write_transaction().unwrap();
    txn.insert(&orders(), doc(1, 2)).unwrap();
    assert_eq!(txn.count(&orders()).unwrap(), 1);
    assert_eq!(server.count(&orders()), 0);
    txn.commit().unwrap();

    assert_eq!(server.count(&orders()), 1);
    assert_eq!(server.find(&orders(), &DocumentId::from(1)), Some(doc(1, 2)));
    assert_eq!(server.committed_seq(), 1);
}

#[test]
fn dropped_transaction_rolls_back() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    {
        let mut txn = conn.open_write_transaction().unwrap();
        txn.insert(&orders(), doc(1, 2)).unwrap();
    }
    let txn = conn.open_write_transaction().unwrap();
    txn.rollback().unwrap();

    assert!(server.collections().is_empty());
    let stats = server.stats().snapshot();
    assert_eq!(stats.rollbacks, 2);
    assert_eq!(stats.commits, 0);
    assert_eq!(server.write_gate().shared_writers(), 0);
}

#[test]
fn raw_insert_rejects_existing_id() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut txn = conn.open_write_transaction().unwrap();
    txn.insert(&orders(), doc(1, 2)).unwrap();
    let err = txn.insert(&orders(), doc(1, 3)).unwrap_err();
    assert!(err.is_unique_violation());

    // upsert replaces instead
    assert!(txn.upsert(&orders(), doc(1, 3)).unwrap());
    assert!(!txn.upsert(&orders(), doc(2, 1)).unwrap());
    txn.commit().unwrap();

    assert_eq!(server.find(&orders(), &DocumentId::from(1)), Some(doc(1, 3)));
}

#[test]
fn insert_requires_id() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();
    let mut txn = conn.open_write_transaction().unwrap();

    let err = txn
        .insert(&orders(), json!({"qty": 1}).as_object().cloned().unwrap())
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidDocument { .. }));
}

#[test]
fn delete_then_insert_in_one_transaction() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut txn = conn.open_write_transaction().unwrap();
    txn.insert(&orders(), doc(1, 1)).unwrap();
    txn.commit().unwrap();

    let mut txn = conn.open_write_transaction().unwrap();
    assert!(txn.delete(&orders(), &DocumentId::from(1)).unwrap());
    assert!(!txn.delete(&orders(), &DocumentId::from(1)).unwrap());
    txn.insert(&orders(), doc(1, 5)).unwrap();
    txn.commit().unwrap();

    assert_eq!(server.find(&orders(), &DocumentId::from(1)), Some(doc(1, 5)));
}

#[test]
fn concurrent_writes_to_same_document_conflict() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut first = conn.open_write_transaction().unwrap();
    let mut second = conn.open_write_transaction().unwrap();
    first.upsert(&orders(), doc(1, 1)).unwrap();
    second.upsert(&orders(), doc(1, 2)).unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(err.is_write_conflict());

    assert_eq!(server.find(&orders(), &DocumentId::from(1)), Some(doc(1, 1)));
    assert_eq!(server.stats().write_conflicts(), 1);
}

#[test]
fn disjoint_writes_do_not_conflict() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut setup = conn.open_write_transaction().unwrap();
    setup.insert(&orders(), doc(1, 1)).unwrap();
    setup.commit().unwrap();

    let mut first = conn.open_write_transaction().unwrap();
    let mut second = conn.open_write_transaction().unwrap();
    first.upsert(&orders(), doc(2, 1)).unwrap();
    second.upsert(&orders(), doc(3, 1)).unwrap();
    first.commit().unwrap();
    second.commit().unwrap();

    assert_eq!(server.count(&orders()), 3);
}

#[test]
fn unique_secondary_index() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut txn = conn.open_exclusive_write_transaction().unwrap();
    assert!(txn
        .create_index(&orders(), IndexSpec::unique("by_sku", "sku"))
        .unwrap());
    assert!(!txn
        .create_index(&orders(), IndexSpec::unique("by_sku", "sku"))
        .unwrap());
    let err = txn
        .create_index(&orders(), IndexSpec::new("by_sku", "sku"))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidOperation { .. }));
    txn.commit().unwrap();

    let mut txn = conn.open_write_transaction().unwrap();
    txn.insert(&orders(), json!({"_id": 1, "sku": "a"}).as_object().cloned().unwrap())
        .unwrap();
    let err = txn
        .insert(&orders(), json!({"_id": 2, "sku": "a"}).as_object().cloned().unwrap())
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueIndexViolation { ref index, .. } if index == "by_sku"));
    txn.commit().unwrap();

    assert_eq!(server.indexes(&orders()).len(), 1);
}

#[test]
fn unique_index_on_duplicated_data_fails() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut txn = conn.open_write_transaction().unwrap();
    txn.insert(&orders(), json!({"_id": 1, "sku": "a"}).as_object().cloned().unwrap())
        .unwrap();
    txn.insert(&orders(), json!({"_id": 2, "sku": "a"}).as_object().cloned().unwrap())
        .unwrap();
    txn.commit().unwrap();

    let mut txn = conn.open_exclusive_write_transaction().unwrap();
    let err = txn
        .create_index(&orders(), IndexSpec::unique("by_sku", "sku"))
        .unwrap_err();
    assert!(err.is_unique_violation());
}

#[test]
fn schema_commands() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();
    let items = Namespace::new("shop", "items");
    let other = Namespace::new("crm", "people");

    let mut txn = conn.open_exclusive_write_transaction().unwrap();
    assert!(txn.create_collection(&orders()).unwrap());
    assert!(!txn.create_collection(&orders()).unwrap());
    txn.insert(&items, doc(1, 1)).unwrap();
    txn.insert(&other, doc(1, 1)).unwrap();
    assert!(matches!(
        txn.drop_index(&orders(), "missing"),
        Err(StoreError::IndexNotFound { .. })
    ));
    txn.commit().unwrap();
    assert_eq!(server.collections().len(), 3);

    let mut txn = conn.open_exclusive_write_transaction().unwrap();
    assert_eq!(txn.drop_database("shop").unwrap(), 2);
    assert!(!txn.collection_exists(&items).unwrap());
    assert!(matches!(
        txn.drop_collection(&orders()),
        Err(StoreError::CollectionNotFound { .. })
    ));
    txn.commit().unwrap();

    assert_eq!(server.collections(), vec![other]);
}

#[test]
fn drop_and_recreate_hides_old_documents() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();

    let mut txn = conn.open_write_transaction().unwrap();
    txn.insert(&orders(), doc(1, 1)).unwrap();
    txn.commit().unwrap();

    let mut txn = conn.open_exclusive_write_transaction().unwrap();
    txn.drop_collection(&orders()).unwrap();
    assert!(txn.create_collection(&orders()).unwrap());
    assert_eq!(txn.count(&orders()).unwrap(), 0);
    txn.commit().unwrap();

    assert_eq!(server.count(&orders()), 0);
    assert!(server.collections().contains(&orders()));
}

#[test]
fn exclusive_transaction_locks_out_writers() {
    let server = MemoryServer::new();
    let conn = server.open_connection().unwrap();
    let exclusive = conn.open_exclusive_write_transaction().unwrap();
    let entered = Arc::new(AtomicBool::new(false));

    let handle = {
        let server = server.clone();
        let entered = Arc::clone(&entered);
        thread::spawn(move || {
            let conn = server.open_connection().unwrap();
            let mut txn = conn.open_write_transaction().unwrap();
            entered.store(true, Ordering::SeqCst);
            txn.insert(&orders(), doc(1, 1)).unwrap();
            txn.commit().unwrap();
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!entered.load(Ordering::SeqCst));
    exclusive.commit().unwrap();

    handle.join().unwrap();
    assert_eq!(server.count(&orders()), 1);
}

#[test]
fn connections_are_released_on_drop() {
    let server = MemoryServer::new();
    let a = server.open_connection().unwrap();
    let b = server.open_connection().unwrap();
    assert_eq!(server.stats().connections_open(), 2);
    drop(a);
    drop(b);
    assert_eq!(server.stats().connections_open(), 0);
    assert_eq!(server.stats().snapshot().connections_opened, 2);
}

#[derive(Debug, Clone)]
enum Write {
    Upsert(i64, i64),
    Delete(i64),
}

fn write_strategy() -> impl Strategy<Value = Write> {
    prop_oneof![
        (0i64..8, any::<i64>()).prop_map(|(id, qty)| Write::Upsert(id, qty)),
        (0i64..8).prop_map(Write::Delete),
    ]
}

proptest! {
    #[test]
    fn committed_state_matches_model(batches in prop::collection::vec(
        prop::collection::vec(write_strategy(), 0..12), 1..6,
    )) {
        let server = MemoryServer::new();
        let conn = server.open_connection().unwrap();
        let mut model: BTreeMap<i64, i64> = BTreeMap::new();

        for writes in batches {
            let mut txn = conn.open_write_transaction().unwrap();
            for write in writes {
                match write {
                    Write::Upsert(id, qty) => {
                        let replaced = txn.upsert(&orders(), doc(id, qty)).unwrap();
                        prop_assert_eq!(replaced, model.insert(id, qty).is_some());
                    }
                    Write::Delete(id) => {
                        let existed = txn.delete(&orders(), &DocumentId::from(id)).unwrap();
                        prop_assert_eq!(existed, model.remove(&id).is_some());
                    }
                }
            }
            txn.commit().unwrap();
        }

        let expected: Vec<Document> = model.iter().map(|(id, qty)| doc(*id, *qty)).collect();
        let mut actual = server.documents(&orders());
        actual.sort_by_key(|d| d["_id"].as_i64());
        prop_assert_eq!(actual, expected);
    }
}
