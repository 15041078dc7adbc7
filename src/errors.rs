use std::time::Duration;

use uuid::Uuid;

use crate::{inventory::LedgerError, notifications::NotificationError, storage::StorageError};

/// Unified error type for all fulfillment operations.
///
/// Every state-mutating entry point returns this taxonomy so callers can
/// distinguish the failed step (precondition, notification, ledger, lock)
/// and decide whether a retry is safe. Nothing here is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid reason: {0}")]
    InvalidReason(String),

    #[error("Incomplete pick: {0}")]
    IncompletePick(String),

    #[error("Notification failed: {0}")]
    NotificationFailed(#[from] NotificationError),

    #[error("Inventory ledger failed: {0}")]
    LedgerFailed(#[from] LedgerError),

    #[error("Concurrent modification for ID {0}")]
    ConcurrentModification(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Event error: {0}")]
    EventError(String),
}

impl From<validator::ValidationErrors> for FulfillmentError {
    fn from(err: validator::ValidationErrors) -> Self {
        FulfillmentError::ValidationError(err.to_string())
    }
}

impl FulfillmentError {
    /// Builds the error for a lock that could not be acquired in time.
    pub fn lock_timeout(entity_id: Uuid, waited: Duration) -> Self {
        tracing::warn!(%entity_id, ?waited, "lock acquisition timed out");
        FulfillmentError::ConcurrentModification(entity_id)
    }

    /// True when the caller may safely re-invoke the same operation after
    /// addressing the cause (transient outage, contention). Precondition
    /// failures are also re-callable but will keep failing until state moves.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FulfillmentError::NotificationFailed(_)
                | FulfillmentError::LedgerFailed(_)
                | FulfillmentError::ConcurrentModification(_)
                | FulfillmentError::StorageError(_)
        )
    }
}
