//! Error types for the outbox engine.
//!
//! Almost every variant reports an invariant violation: a caller acknowledged
//! out of order, removed batches that are not contiguous, or let the key index
//! drift from the queue. These are bugs in the caller and are never retried.
//! Lookups that simply find nothing return `None` instead of an error.

use crate::{BatchId, DocumentKey};
use thiserror::Error;

/// All possible errors from the outbox engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Mutation queue invariants
    #[error("mutation batches must not be empty")]
    EmptyMutationBatch,

    #[error("mutation batch ids must be monotonically increasing: {prior} then {next}")]
    NonMonotonicBatchId { prior: BatchId, next: BatchId },

    #[error(
        "highest acknowledged batch id {highest_acknowledged} must be less than the next batch id {next_batch_id}"
    )]
    AcknowledgedBeyondNext {
        highest_acknowledged: BatchId,
        next_batch_id: BatchId,
    },

    #[error("mutation batches must be acknowledged in order: {batch_id} is not after {highest_acknowledged}")]
    OutOfOrderAcknowledgement {
        batch_id: BatchId,
        highest_acknowledged: BatchId,
    },

    #[error("batch {batch_id} must exist to be {action}")]
    MissingBatch {
        batch_id: BatchId,
        action: &'static str,
    },

    #[error("queue ordering failure: expected batch {expected}, got batch {found}")]
    QueueOrdering { expected: BatchId, found: BatchId },

    #[error("can't acknowledge previously removed batch {0}")]
    AcknowledgeRemovedBatch(BatchId),

    #[error("can't acknowledge batch {batch_id} while batch {pending} is still pending")]
    AcknowledgeSkipsPendingBatch { batch_id: BatchId, pending: BatchId },

    #[error("can't reject batch {0}: it has already been acknowledged")]
    RejectAcknowledgedBatch(BatchId),

    #[error("should not remove mutations when none exist")]
    EmptyRemoval,

    #[error("removed batches must be contiguous in the queue: expected batch {expected}, got batch {found}")]
    NonContiguousRemoval { expected: BatchId, found: BatchId },

    #[error("batch {batch_id} referenced by key {key} must exist in the main table")]
    DanglingIndexEntry { key: DocumentKey, batch_id: BatchId },

    #[error("document leak: {0} dangling mutation references on an empty queue")]
    DocumentLeak(usize),

    // Diff invariants
    #[error("invalid change for first snapshot of {0}: only added documents are allowed")]
    InvalidFirstSnapshotChange(DocumentKey),

    #[error("got added events in wrong order at {0}")]
    AddedOutOfOrder(DocumentKey),

    #[error("index for document {0} not found")]
    UnknownDocument(DocumentKey),

    // State errors
    #[error("invalid queue snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Whether this error reports caller misuse rather than bad input data.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(self, Error::InvalidSnapshot(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Logs an invariant violation where it is detected and hands it back.
pub(crate) fn violation(err: Error) -> Error {
    tracing::error!(error = %err, "invariant violated");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::OutOfOrderAcknowledgement {
            batch_id: 2,
            highest_acknowledged: 3,
        };
        assert_eq!(
            err.to_string(),
            "mutation batches must be acknowledged in order: 2 is not after 3"
        );

        let err = Error::MissingBatch {
            batch_id: 7,
            action: "removed",
        };
        assert_eq!(err.to_string(), "batch 7 must exist to be removed");

        let key = DocumentKey::from_string("rooms/a").unwrap();
        let err = Error::DanglingIndexEntry { key, batch_id: 4 };
        assert_eq!(
            err.to_string(),
            "batch 4 referenced by key rooms/a must exist in the main table"
        );
    }

    #[test]
    fn snapshot_errors_are_not_invariant_violations() {
        assert!(!Error::InvalidSnapshot("bad".into()).is_invariant_violation());
        assert!(Error::EmptyMutationBatch.is_invariant_violation());
        assert!(Error::DocumentLeak(3).is_invariant_violation());
    }
}
