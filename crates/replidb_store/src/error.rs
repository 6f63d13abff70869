//! Error types for the document store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a document store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rolled the transaction back because it raced with
    /// another committed transaction.
    #[error("write conflict on {namespace}: {reason}")]
    WriteConflict {
        /// Namespace where the conflict was detected.
        namespace: String,
        /// Description of the conflict.
        reason: String,
    },

    /// A raw insert collided with an existing unique key.
    #[error("duplicate key {key} for index {index} on {namespace}")]
    UniqueIndexViolation {
        /// Namespace of the collection.
        namespace: String,
        /// Name of the violated index (`_id_` for the identity index).
        index: String,
        /// Canonical text of the duplicated key.
        key: String,
    },

    /// Collection not found.
    #[error("collection not found: {namespace}")]
    CollectionNotFound {
        /// Namespace of the collection.
        namespace: String,
    },

    /// Index not found.
    #[error("index {index} not found on {namespace}")]
    IndexNotFound {
        /// Namespace of the collection.
        namespace: String,
        /// Name of the index.
        index: String,
    },

    /// Document cannot be stored.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl StoreError {
    /// Creates a write conflict error.
    pub fn write_conflict(namespace: impl ToString, reason: impl Into<String>) -> Self {
        Self::WriteConflict {
            namespace: namespace.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a unique index violation error.
    pub fn unique_violation(
        namespace: impl ToString,
        index: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::UniqueIndexViolation {
            namespace: namespace.to_string(),
            index: index.into(),
            key: key.into(),
        }
    }

    /// Creates a collection not found error.
    pub fn collection_not_found(namespace: impl ToString) -> Self {
        Self::CollectionNotFound {
            namespace: namespace.to_string(),
        }
    }

    /// Creates an index not found error.
    pub fn index_not_found(namespace: impl ToString, index: impl Into<String>) -> Self {
        Self::IndexNotFound {
            namespace: namespace.to_string(),
            index: index.into(),
        }
    }

    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the transaction was rolled back by a concurrent commit.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }

    /// Returns true if a unique key collided.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueIndexViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StoreError::write_conflict("a.b", "raced").is_write_conflict());
        assert!(StoreError::unique_violation("a.b", "_id_", "1").is_unique_violation());
        assert!(!StoreError::invalid_operation("closed").is_write_conflict());
    }

    #[test]
    fn error_display() {
        let err = StoreError::unique_violation("shop.orders", "_id_", "7");
        assert_eq!(err.to_string(), "duplicate key 7 for index _id_ on shop.orders");

        let err = StoreError::index_not_found("shop.orders", "by_sku");
        assert!(err.to_string().contains("by_sku"));
    }
}
