//! Namespaces, documents and document identities.

use crate::error::{OplogError, OplogResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Name of the identity field carried by every stored document.
pub const ID_FIELD: &str = "_id";

/// Collection name used by command operations (`db.$cmd`).
pub const COMMAND_COLLECTION: &str = "$cmd";

/// A JSON document.
pub type Document = Map<String, Value>;

/// Target of an operation: a collection inside a database.
///
/// Serialized as `database.collection`. The database part never contains a
/// dot; everything after the first dot is the collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Creates a namespace from its parts.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Returns the command namespace of a database.
    pub fn command(database: impl Into<String>) -> Self {
        Self::new(database, COMMAND_COLLECTION)
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns a sibling namespace in the same database.
    pub fn sibling(&self, collection: impl Into<String>) -> Self {
        Self::new(self.database.clone(), collection)
    }

    /// Returns true if this is a `db.$cmd` namespace.
    pub fn is_command(&self) -> bool {
        self.collection == COMMAND_COLLECTION
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = OplogError;

    fn from_str(s: &str) -> OplogResult<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(OplogError::invalid_namespace(s)),
        }
    }
}

impl TryFrom<String> for Namespace {
    type Error = OplogError;

    fn try_from(value: String) -> OplogResult<Self> {
        value.parse()
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.to_string()
    }
}

/// Identity of a document within a collection (its `_id` value).
///
/// Two ids are equal when their canonical JSON text is equal, which also
/// gives ids a total order usable as a map key.
#[derive(Debug, Clone)]
pub struct DocumentId {
    key: String,
    value: Value,
}

impl DocumentId {
    /// Creates an id from a JSON value.
    pub fn new(value: Value) -> Self {
        Self {
            key: value.to_string(),
            value,
        }
    }

    /// Extracts the id of a document, if it has one.
    pub fn of(document: &Document) -> Option<Self> {
        document.get(ID_FIELD).cloned().map(Self::new)
    }

    /// Returns the id as a JSON value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns the canonical text of the id.
    pub fn as_key(&self) -> &str {
        &self.key
    }

    /// Returns a document holding only this id.
    pub fn seed_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), self.value.clone());
        doc
    }
}

impl PartialEq for DocumentId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DocumentId {}

impl Hash for DocumentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for DocumentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocumentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<i64> for DocumentId {
    fn from(value: i64) -> Self {
        Self::new(Value::from(value))
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(Value::from(value))
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self::new(Value::from(value))
    }
}
