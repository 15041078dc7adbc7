use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{audit::AuditRecord, order::Order, refund::RefundRequest};
use crate::storage::{AuditSink, OrderStore, RefundStore, StorageError};

/// In-memory store implementing all three storage traits.
///
/// Used by the test suite and suitable for embedding; a production
/// deployment swaps in a database-backed implementation of the same traits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    orders: DashMap<Uuid, Order>,
    refunds: DashMap<Uuid, RefundRequest>,
    audits: RwLock<Vec<AuditRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an order directly, bypassing the state machines. Test and
    /// bootstrap surface; production orders arrive from checkout.
    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    /// Seeds a refund request directly. Refund intake (complaint
    /// validation, proof upload) lives outside this crate.
    pub fn insert_refund(&self, refund: RefundRequest) {
        self.refunds.insert(refund.id, refund);
    }

    /// All audit records appended for an entity, in append order.
    pub fn audit_records_for(&self, entity_id: Uuid) -> Vec<AuditRecord> {
        self.audits
            .read()
            .expect("audit log lock poisoned")
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub fn audit_record_count(&self) -> usize {
        self.audits.read().expect("audit log lock poisoned").len()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn load(&self, order_id: Uuid) -> Result<Option<Order>, StorageError> {
        Ok(self.orders.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, order: &Order) -> Result<(), StorageError> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }
}

#[async_trait]
impl RefundStore for InMemoryStore {
    async fn load(&self, refund_id: Uuid) -> Result<Option<RefundRequest>, StorageError> {
        Ok(self
            .refunds
            .get(&refund_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, refund: &RefundRequest) -> Result<(), StorageError> {
        self.refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<RefundRequest>, StorageError> {
        Ok(self
            .refunds
            .iter()
            .filter(|entry| entry.order_id == order_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn append(&self, record: AuditRecord) -> Result<(), StorageError> {
        self.audits
            .write()
            .map_err(|e| StorageError::Backend(format!("audit log lock poisoned: {}", e)))?
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::{EntityKind, TransitionOutcome};
    use crate::models::order::{CustomerContact, LineItem};
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            vec![LineItem {
                variation_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: dec!(9.99),
            }],
            CustomerContact {
                email: "sam@example.com".into(),
                name: "Sam".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn load_returns_none_for_unknown_order() {
        let store = InMemoryStore::new();
        assert!(OrderStore::load(&store, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryStore::new();
        let order = sample_order();
        OrderStore::save(&store, &order).await.unwrap();
        let loaded = OrderStore::load(&store, order.id).await.unwrap().unwrap();
        assert_eq!(loaded, order);
    }

    #[tokio::test]
    async fn audit_records_are_append_only_and_filterable() {
        let store = InMemoryStore::new();
        let entity_id = Uuid::new_v4();
        for outcome in [TransitionOutcome::Failed, TransitionOutcome::Succeeded] {
            store
                .append(AuditRecord::new(
                    EntityKind::Order,
                    entity_id,
                    Uuid::new_v4(),
                    "Pending",
                    "Verified",
                    outcome,
                    None,
                ))
                .await
                .unwrap();
        }
        store
            .append(AuditRecord::new(
                EntityKind::Refund,
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Processing",
                "Completed",
                TransitionOutcome::Succeeded,
                None,
            ))
            .await
            .unwrap();

        let records = store.audit_records_for(entity_id);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, TransitionOutcome::Failed);
        assert_eq!(records[1].outcome, TransitionOutcome::Succeeded);
        assert_eq!(store.audit_record_count(), 3);
    }
}
