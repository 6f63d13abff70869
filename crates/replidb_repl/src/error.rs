//! Error types for batch application.

use replidb_store::StoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplResult<T> = Result<T, ReplError>;

/// Errors raised while applying oplog batches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplError {
    /// The backend rolled the transaction back after a concurrent write.
    /// Triggers a re-apply of the whole unit.
    #[error("write conflict: {0}")]
    WriteConflict(#[source] StoreError),

    /// An optimistic insert collided with an existing document. Handled by
    /// re-running the namespace job pessimistically.
    #[error("uniqueness conflict: {0}")]
    UniquenessConflict(#[source] StoreError),

    /// The operation cannot be applied; retrying will not help.
    #[error("{message}")]
    Domain {
        /// Description of the failure.
        message: String,
        /// Store error behind the failure, if any.
        #[source]
        source: Option<StoreError>,
    },

    /// A namespace job failed in a way the fallback cannot recover from.
    #[error("namespace job on {namespace} failed: {message}")]
    NamespaceJob {
        /// Namespace of the job.
        namespace: String,
        /// Description of the failure.
        message: String,
    },

    /// Re-application after a write conflict did not succeed.
    #[error("gave up after {attempts} attempt(s){}: {cause}", abort_note(.aborted))]
    GiveUp {
        /// Attempts made by the retrier.
        attempts: u32,
        /// True if an attempt failed with a non-retryable error.
        aborted: bool,
        /// Error of the last attempt.
        #[source]
        cause: Box<ReplError>,
    },
}

fn abort_note(aborted: &bool) -> &'static str {
    if *aborted {
        " (aborted)"
    } else {
        ""
    }
}

impl ReplError {
    /// Creates a domain error with no store error behind it.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a domain error caused by a store error.
    pub fn domain_from(message: impl Into<String>, source: StoreError) -> Self {
        Self::Domain {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a namespace job error.
    pub fn namespace_job(namespace: impl ToString, message: impl Into<String>) -> Self {
        Self::NamespaceJob {
            namespace: namespace.to_string(),
            message: message.into(),
        }
    }

    /// Returns true for a write conflict.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, ReplError::WriteConflict(_))
    }

    /// Returns true for a uniqueness conflict.
    pub fn is_uniqueness_conflict(&self) -> bool {
        matches!(self, ReplError::UniquenessConflict(_))
    }

    /// Returns true if the retry path gave up, as opposed to an error that
    /// failed the unit on its first attempt.
    pub fn is_give_up(&self) -> bool {
        matches!(self, ReplError::GiveUp { .. })
    }
}

impl From<StoreError> for ReplError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WriteConflict { .. } => ReplError::WriteConflict(err),
            StoreError::UniqueIndexViolation { .. } => ReplError::UniquenessConflict(err),
            other => ReplError::Domain {
                message: other.to_string(),
                source: Some(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn store_errors_are_classified() {
        let err: ReplError = StoreError::write_conflict("db.c", "raced").into();
        assert!(err.is_write_conflict());

        let err: ReplError = StoreError::unique_violation("db.c", "_id_", "1").into();
        assert!(err.is_uniqueness_conflict());

        let err: ReplError = StoreError::invalid_document("no _id").into();
        assert!(matches!(err, ReplError::Domain { source: Some(_), .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn give_up_display() {
        let err = ReplError::GiveUp {
            attempts: 3,
            aborted: false,
            cause: Box::new(StoreError::write_conflict("db.c", "raced").into()),
        };
        assert!(err.is_give_up());
        assert_eq!(
            err.to_string(),
            "gave up after 3 attempt(s): write conflict: write conflict on db.c: raced"
        );

        let err = ReplError::GiveUp {
            attempts: 1,
            aborted: true,
            cause: Box::new(ReplError::domain("boom")),
        };
        assert_eq!(err.to_string(), "gave up after 1 attempt(s) (aborted): boom");
    }
}
