use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{audit::AuditRecord, order::Order, refund::RefundRequest};

pub mod memory;

pub use memory::InMemoryStore;

/// Storage backend errors. The concrete store (SQL, document store, the
/// in-memory one here) is an external collaborator behind these traits.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Load/save access to orders. `load` returns `None` for unknown ids; the
/// state machines turn that into `NotFound`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn load(&self, order_id: Uuid) -> Result<Option<Order>, StorageError>;
    async fn save(&self, order: &Order) -> Result<(), StorageError>;
}

/// Load/save access to refund requests, plus the sibling lookup the
/// over-refund invariant needs.
#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn load(&self, refund_id: Uuid) -> Result<Option<RefundRequest>, StorageError>;
    async fn save(&self, refund: &RefundRequest) -> Result<(), StorageError>;
    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<RefundRequest>, StorageError>;
}

/// Append-only sink for audit records. Records are never updated or
/// deleted once written.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), StorageError>;
}
