//! Error types for the oplog crate.

use thiserror::Error;

/// Result type for oplog operations.
pub type OplogResult<T> = Result<T, OplogError>;

/// Errors raised while reading operations or building batches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OplogError {
    /// Namespace string is not of the form `database.collection`.
    #[error("invalid namespace: {namespace:?}")]
    InvalidNamespace {
        /// The rejected namespace text.
        namespace: String,
    },

    /// Operation type code is not recognized.
    #[error("unknown operation type: {code:?}")]
    UnknownOperationType {
        /// The rejected `op` code.
        code: String,
    },

    /// A document lacks the `_id` field required by its operation.
    #[error("document in {namespace} has no _id")]
    MissingId {
        /// Namespace of the operation.
        namespace: String,
    },

    /// Operation body is structurally invalid.
    #[error("malformed operation: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },

    /// A CUD batch was built from an empty operation list.
    #[error("CUD batch must contain at least one operation")]
    EmptyBatch,

    /// A CUD batch received an operation outside insert/update/delete.
    #[error("operation at ts {ts} is a {kind}, not a create/update/delete")]
    NotCud {
        /// Position of the offending operation.
        ts: u64,
        /// Kind of the offending operation.
        kind: String,
    },
}

impl OplogError {
    /// Creates a malformed operation error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates an invalid namespace error.
    pub fn invalid_namespace(namespace: impl Into<String>) -> Self {
        Self::InvalidNamespace {
            namespace: namespace.into(),
        }
    }
}
