//! Replicated operations.

use crate::error::{OplogError, OplogResult};
use crate::namespace::{Document, DocumentId, Namespace, ID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Kind of a replicated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Document insertion.
    Insert,
    /// Document update.
    Update,
    /// Document deletion.
    Delete,
    /// Database command.
    Command,
    /// No-op marker.
    Noop,
}

impl OperationKind {
    /// Returns the lowercase name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Command => "command",
            OperationKind::Noop => "noop",
        }
    }

    /// Returns the oplog `op` code.
    pub fn code(&self) -> &'static str {
        match self {
            OperationKind::Insert => "i",
            OperationKind::Update => "u",
            OperationKind::Delete => "d",
            OperationKind::Command => "c",
            OperationKind::Noop => "n",
        }
    }

    /// Returns true for create/update/delete kinds.
    pub fn is_cud(&self) -> bool {
        matches!(
            self,
            OperationKind::Insert | OperationKind::Update | OperationKind::Delete
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change described by an update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Modification {
    /// Replace the whole document. The `_id` of the target is kept.
    Replace(Document),
    /// Set and unset top-level fields.
    Modify {
        /// Fields to set.
        set: Document,
        /// Fields to remove.
        unset: BTreeSet<String>,
    },
}

impl Modification {
    /// Creates a `$set` modification.
    pub fn set(fields: Document) -> Self {
        Modification::Modify {
            set: fields,
            unset: BTreeSet::new(),
        }
    }

    /// Creates an `$unset` modification.
    pub fn unset<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Modification::Modify {
            set: Document::new(),
            unset: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses the `o` field of an update entry.
    ///
    /// A document whose keys all start with `$` is a modifier document;
    /// anything else is a replacement.
    pub fn parse(document: Document) -> OplogResult<Self> {
        if !document.keys().any(|k| k.starts_with('$')) {
            return Ok(Modification::Replace(document));
        }

        let mut set = Document::new();
        let mut unset = BTreeSet::new();
        for (key, value) in document {
            match (key.as_str(), value) {
                ("$set", Value::Object(fields)) => set = fields,
                ("$unset", Value::Object(fields)) => {
                    unset = fields.into_iter().map(|(k, _)| k).collect()
                }
                ("$set" | "$unset", _) => {
                    return Err(OplogError::malformed(format!("{key} expects a document")))
                }
                (other, _) => {
                    return Err(OplogError::malformed(format!(
                        "unsupported update modifier {other:?}"
                    )))
                }
            }
        }
        Ok(Modification::Modify { set, unset })
    }

    /// Applies this modification to `current`, keeping the identity `id`.
    pub fn apply(&self, id: &DocumentId, current: &Document) -> Document {
        let mut out = match self {
            Modification::Replace(replacement) => replacement.clone(),
            Modification::Modify { set, unset } => {
                let mut out = current.clone();
                for field in unset {
                    out.remove(field);
                }
                for (field, value) in set {
                    out.insert(field.clone(), value.clone());
                }
                out
            }
        };
        out.insert(ID_FIELD.to_string(), id.value().clone());
        out
    }

    /// Returns the oplog representation of this modification.
    pub fn to_document(&self) -> Document {
        match self {
            Modification::Replace(doc) => doc.clone(),
            Modification::Modify { set, unset } => {
                let mut doc = Document::new();
                if !set.is_empty() || unset.is_empty() {
                    doc.insert("$set".into(), Value::Object(set.clone()));
                }
                if !unset.is_empty() {
                    let fields = unset
                        .iter()
                        .map(|f| (f.clone(), Value::from(1)))
                        .collect::<Document>();
                    doc.insert("$unset".into(), Value::Object(fields));
                }
                doc
            }
        }
    }
}

/// A database command carried by a `c` operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a collection.
    Create {
        /// Collection to create.
        collection: String,
    },
    /// Drop a collection.
    Drop {
        /// Collection to drop.
        collection: String,
    },
    /// Drop the whole database.
    DropDatabase,
    /// Build a single-field index.
    CreateIndex {
        /// Indexed collection.
        collection: String,
        /// Index name.
        name: String,
        /// Indexed top-level field.
        field: String,
        /// Whether the index rejects duplicate values.
        unique: bool,
    },
    /// Drop an index by name.
    DropIndex {
        /// Indexed collection.
        collection: String,
        /// Index name.
        name: String,
    },
    /// Any other command, kept verbatim.
    Other {
        /// Command name, when the document has any key.
        name: Option<String>,
        /// The raw command document.
        document: Document,
    },
}

impl Command {
    /// Returns the command name used on the wire.
    pub fn name(&self) -> Option<&str> {
        match self {
            Command::Create { .. } => Some("create"),
            Command::Drop { .. } => Some("drop"),
            Command::DropDatabase => Some("dropDatabase"),
            Command::CreateIndex { .. } => Some("createIndexes"),
            Command::DropIndex { .. } => Some("dropIndexes"),
            Command::Other { name, .. } => name.as_deref(),
        }
    }

    /// Parses the `o` field of a command entry.
    pub fn parse(document: Document) -> OplogResult<Self> {
        let text = |key: &str| -> OplogResult<String> {
            document
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| OplogError::malformed(format!("{key} expects a string")))
        };

        if document.contains_key("create") {
            return Ok(Command::Create {
                collection: text("create")?,
            });
        }
        if document.contains_key("drop") {
            return Ok(Command::Drop {
                collection: text("drop")?,
            });
        }
        if document.contains_key("dropDatabase") {
            return Ok(Command::DropDatabase);
        }
        if document.contains_key("createIndexes") {
            let key = document
                .get("key")
                .and_then(Value::as_object)
                .ok_or_else(|| OplogError::malformed("createIndexes expects a key document"))?;
            let mut fields = key.keys();
            let field = match (fields.next(), fields.next()) {
                (Some(field), None) => field.clone(),
                _ => {
                    return Err(OplogError::malformed(
                        "only single-field indexes are supported",
                    ))
                }
            };
            return Ok(Command::CreateIndex {
                collection: text("createIndexes")?,
                name: text("name")?,
                field,
                unique: document
                    .get("unique")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }
        if document.contains_key("dropIndexes") {
            return Ok(Command::DropIndex {
                collection: text("dropIndexes")?,
                name: text("index")?,
            });
        }

        Ok(Command::Other {
            name: document.keys().next().cloned(),
            document,
        })
    }

    /// Returns the oplog representation of this command.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        match self {
            Command::Create { collection } => {
                doc.insert("create".into(), collection.clone().into());
            }
            Command::Drop { collection } => {
                doc.insert("drop".into(), collection.clone().into());
            }
            Command::DropDatabase => {
                doc.insert("dropDatabase".into(), 1.into());
            }
            Command::CreateIndex {
                collection,
                name,
                field,
                unique,
            } => {
                let mut key = Document::new();
                key.insert(field.clone(), 1.into());
                doc.insert("createIndexes".into(), collection.clone().into());
                doc.insert("name".into(), name.clone().into());
                doc.insert("key".into(), Value::Object(key));
                if *unique {
                    doc.insert("unique".into(), true.into());
                }
            }
            Command::DropIndex { collection, name } => {
                doc.insert("dropIndexes".into(), collection.clone().into());
                doc.insert("index".into(), name.clone().into());
            }
            Command::Other { document, .. } => doc = document.clone(),
        }
        doc
    }
}

/// Payload of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationBody {
    /// Insert a new document.
    Insert {
        /// Identity of the inserted document.
        id: DocumentId,
        /// The full document, `_id` included.
        document: Document,
    },
    /// Update one document.
    Update {
        /// Identity of the target document.
        id: DocumentId,
        /// The change to apply.
        modification: Modification,
        /// Whether a missing target is created.
        upsert: bool,
    },
    /// Delete one document.
    Delete {
        /// Identity of the target document.
        id: DocumentId,
    },
    /// Run a command.
    Command(Command),
    /// Do nothing.
    Noop,
}

/// One entry of the source oplog.
///
/// Operations are immutable once read. `ts` is the position of the entry in
/// the source oplog and is what callers checkpoint on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOperation", into = "RawOperation")]
pub struct Operation {
    /// Position in the source oplog.
    pub ts: u64,
    /// Target namespace.
    pub namespace: Namespace,
    /// What the operation does.
    pub body: OperationBody,
}

impl Operation {
    /// Creates an insert operation. The document must carry an `_id`.
    pub fn insert(ts: u64, namespace: Namespace, document: Document) -> OplogResult<Self> {
        let id = DocumentId::of(&document).ok_or_else(|| OplogError::MissingId {
            namespace: namespace.to_string(),
        })?;
        Ok(Self {
            ts,
            namespace,
            body: OperationBody::Insert { id, document },
        })
    }

    /// Creates an update operation.
    pub fn update(
        ts: u64,
        namespace: Namespace,
        id: impl Into<DocumentId>,
        modification: Modification,
        upsert: bool,
    ) -> Self {
        Self {
            ts,
            namespace,
            body: OperationBody::Update {
                id: id.into(),
                modification,
                upsert,
            },
        }
    }

    /// Creates a delete operation.
    pub fn delete(ts: u64, namespace: Namespace, id: impl Into<DocumentId>) -> Self {
        Self {
            ts,
            namespace,
            body: OperationBody::Delete { id: id.into() },
        }
    }

    /// Creates a command operation on `database.$cmd`.
    pub fn command(ts: u64, database: impl Into<String>, command: Command) -> Self {
        Self {
            ts,
            namespace: Namespace::command(database),
            body: OperationBody::Command(command),
        }
    }

    /// Creates a no-op operation.
    pub fn noop(ts: u64, namespace: Namespace) -> Self {
        Self {
            ts,
            namespace,
            body: OperationBody::Noop,
        }
    }

    /// Returns the kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self.body {
            OperationBody::Insert { .. } => OperationKind::Insert,
            OperationBody::Update { .. } => OperationKind::Update,
            OperationBody::Delete { .. } => OperationKind::Delete,
            OperationBody::Command(_) => OperationKind::Command,
            OperationBody::Noop => OperationKind::Noop,
        }
    }

    /// Returns the identity of the target document for CUD operations.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match &self.body {
            OperationBody::Insert { id, .. }
            | OperationBody::Update { id, .. }
            | OperationBody::Delete { id } => Some(id),
            OperationBody::Command(_) | OperationBody::Noop => None,
        }
    }

    /// Returns the command name for command operations.
    pub fn command_name(&self) -> Option<&str> {
        match &self.body {
            OperationBody::Command(command) => command.name(),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} on {}", self.kind(), self.ts, self.namespace)?;
        if let Some(id) = self.document_id() {
            write!(f, " ({id})")?;
        }
        Ok(())
    }
}

/// Oplog entry as it appears in JSON (`ts`, `op`, `ns`, `o`, `o2`, `b`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawOperation {
    ts: u64,
    op: String,
    ns: Namespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    o: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    o2: Option<Document>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    b: bool,
}

impl TryFrom<RawOperation> for Operation {
    type Error = OplogError;

    fn try_from(raw: RawOperation) -> OplogResult<Self> {
        let missing_id = || OplogError::MissingId {
            namespace: raw.ns.to_string(),
        };
        let body = |field: &str, doc: Option<Document>| {
            doc.ok_or_else(|| OplogError::malformed(format!("{} entry lacks {field}", raw.op)))
        };

        match raw.op.as_str() {
            "i" => Operation::insert(raw.ts, raw.ns, body("o", raw.o)?),
            "u" => {
                let selector = body("o2", raw.o2)?;
                let id = DocumentId::of(&selector).ok_or_else(missing_id)?;
                let modification = Modification::parse(body("o", raw.o)?)?;
                Ok(Operation::update(raw.ts, raw.ns, id, modification, raw.b))
            }
            "d" => {
                let id = DocumentId::of(&body("o", raw.o)?).ok_or_else(missing_id)?;
                Ok(Operation::delete(raw.ts, raw.ns, id))
            }
            "c" => {
                let command = Command::parse(body("o", raw.o)?)?;
                Ok(Operation {
                    ts: raw.ts,
                    namespace: raw.ns,
                    body: OperationBody::Command(command),
                })
            }
            "n" => Ok(Operation::noop(raw.ts, raw.ns)),
            other => Err(OplogError::UnknownOperationType { code: other.into() }),
        }
    }
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        let code = op.kind().code().to_string();
        let (o, o2, b) = match op.body {
            OperationBody::Insert { document, .. } => (Some(document), None, false),
            OperationBody::Update {
                id,
                modification,
                upsert,
            } => (
                Some(modification.to_document()),
                Some(id.seed_document()),
                upsert,
            ),
            OperationBody::Delete { id } => (Some(id.seed_document()), None, false),
            OperationBody::Command(command) => (Some(command.to_document()), None, false),
            OperationBody::Noop => (None, None, false),
        };
        RawOperation {
            ts: op.ts,
            op: code,
            ns: op.namespace,
            o,
            o2,
            b,
        }
    }
}
