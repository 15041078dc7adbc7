use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    audit::AuditTrail,
    config::AppConfig,
    errors::FulfillmentError,
    events::EventSender,
    inventory::InventoryLedger,
    models::{order::Order, refund::RefundRequest},
    notifications::NotificationPort,
    services::{OrderStateMachine, RefundStateMachine, TransitionSettings},
    storage::{AuditSink, OrderStore, RefundStore},
};

type LockMap = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

/// The single entry point for fulfillment operations.
///
/// Serializes transitions per order id and per refund id: at most one
/// transition is in flight for a given entity, while unrelated entities
/// proceed in parallel. The lock is held for the whole transition and
/// released on every exit path; acquisition is bounded by the configured
/// lock timeout and elapses to `ConcurrentModification`.
#[derive(Clone)]
pub struct FulfillmentService {
    orders: OrderStateMachine,
    refunds: RefundStateMachine,
    order_store: Arc<dyn OrderStore>,
    refund_store: Arc<dyn RefundStore>,
    order_locks: LockMap,
    refund_locks: LockMap,
    lock_timeout: Duration,
}

impl FulfillmentService {
    pub fn new(
        order_store: Arc<dyn OrderStore>,
        refund_store: Arc<dyn RefundStore>,
        audit_sink: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationPort>,
        ledger: Arc<InventoryLedger>,
        events: EventSender,
        config: &AppConfig,
    ) -> Self {
        let audit = AuditTrail::new(audit_sink);
        let settings = TransitionSettings::from(config);
        let orders = OrderStateMachine::new(
            order_store.clone(),
            notifier.clone(),
            ledger,
            audit.clone(),
            events.clone(),
            settings.clone(),
        );
        let refunds = RefundStateMachine::new(
            refund_store.clone(),
            order_store.clone(),
            notifier,
            audit,
            events,
            settings,
        );
        Self {
            orders,
            refunds,
            order_store,
            refund_store,
            order_locks: Arc::new(DashMap::new()),
            refund_locks: Arc::new(DashMap::new()),
            lock_timeout: config.lock_timeout(),
        }
    }

    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let guard = self.lock(&self.order_locks, order_id).await?;
        let result = self.orders.verify_payment(order_id, actor).await;
        self.unlock(&self.order_locks, order_id, guard);
        result
    }

    #[instrument(skip(self, reason))]
    pub async fn reject_payment(
        &self,
        order_id: Uuid,
        actor: Uuid,
        reason: &str,
    ) -> Result<Order, FulfillmentError> {
        let guard = self.lock(&self.order_locks, order_id).await?;
        let result = self.orders.reject_payment(order_id, actor, reason).await;
        self.unlock(&self.order_locks, order_id, guard);
        result
    }

    #[instrument(skip(self))]
    pub async fn mark_insufficient_payment(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let guard = self.lock(&self.order_locks, order_id).await?;
        let result = self.orders.mark_insufficient_payment(order_id, actor).await;
        self.unlock(&self.order_locks, order_id, guard);
        result
    }

    #[instrument(skip(self, checked_items))]
    pub async fn begin_shipping(
        &self,
        order_id: Uuid,
        actor: Uuid,
        tracking_number: &str,
        checked_items: &HashSet<Uuid>,
    ) -> Result<Order, FulfillmentError> {
        let guard = self.lock(&self.order_locks, order_id).await?;
        let result = self
            .orders
            .begin_shipping(order_id, actor, tracking_number, checked_items)
            .await;
        self.unlock(&self.order_locks, order_id, guard);
        result
    }

    #[instrument(skip(self))]
    pub async fn complete_shipping(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let guard = self.lock(&self.order_locks, order_id).await?;
        let result = self.orders.complete_shipping(order_id, actor).await;
        self.unlock(&self.order_locks, order_id, guard);
        result
    }

    #[instrument(skip(self))]
    pub async fn cancel_shipping(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let guard = self.lock(&self.order_locks, order_id).await?;
        let result = self.orders.cancel_shipping(order_id, actor).await;
        self.unlock(&self.order_locks, order_id, guard);
        result
    }

    #[instrument(skip(self))]
    pub async fn complete_refund(
        &self,
        refund_id: Uuid,
        actor: Uuid,
    ) -> Result<RefundRequest, FulfillmentError> {
        let guard = self.lock(&self.refund_locks, refund_id).await?;
        let result = self.refunds.complete_refund(refund_id, actor).await;
        self.unlock(&self.refund_locks, refund_id, guard);
        result
    }

    #[instrument(skip(self))]
    pub async fn cancel_refund(
        &self,
        refund_id: Uuid,
        actor: Uuid,
    ) -> Result<RefundRequest, FulfillmentError> {
        let guard = self.lock(&self.refund_locks, refund_id).await?;
        let result = self.refunds.cancel_refund(refund_id, actor).await;
        self.unlock(&self.refund_locks, refund_id, guard);
        result
    }

    /// Read-only order lookup, no lock taken.
    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, FulfillmentError> {
        self.order_store
            .load(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Read-only refund lookup, no lock taken.
    pub async fn get_refund(&self, refund_id: Uuid) -> Result<RefundRequest, FulfillmentError> {
        self.refund_store
            .load(refund_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("Refund {} not found", refund_id)))
    }

    async fn lock(
        &self,
        locks: &LockMap,
        entity_id: Uuid,
    ) -> Result<OwnedMutexGuard<()>, FulfillmentError> {
        // Clone the Arc out before awaiting so the map shard is not held
        // across the lock acquisition.
        let cell = locks
            .entry(entity_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        timeout(self.lock_timeout, cell.lock_owned())
            .await
            .map_err(|_| FulfillmentError::lock_timeout(entity_id, self.lock_timeout))
    }

    /// Releases the guard and drops the map entry when no other task holds
    /// the lock, so the maps do not grow with every entity id ever touched.
    fn unlock(&self, locks: &LockMap, entity_id: Uuid, guard: OwnedMutexGuard<()>) {
        drop(guard);
        // remove_if holds the shard lock while checking, so a concurrent
        // acquirer that already cloned the Arc keeps the entry alive
        locks.remove_if(&entity_id, |_, cell| Arc::strong_count(cell) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{CustomerContact, LineItem};
    use crate::notifications::NotificationError;
    use crate::storage::InMemoryStore;
    use rust_decimal_macros::dec;

    struct NoopNotifier;

    #[async_trait::async_trait]
    impl NotificationPort for NoopNotifier {
        async fn send(
            &self,
            _recipient: &CustomerContact,
            _subject: &str,
            _text_body: &str,
            _html_body: &str,
        ) -> Result<(), NotificationError> {
            Ok(())
        }
    }

    fn service_with_store() -> (FulfillmentService, Arc<InMemoryStore>, tokio::sync::mpsc::Receiver<crate::events::Event>) {
        let store = Arc::new(InMemoryStore::new());
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let service = FulfillmentService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(NoopNotifier),
            Arc::new(InventoryLedger::new()),
            EventSender::new(tx),
            &AppConfig::default(),
        );
        (service, store, rx)
    }

    #[tokio::test]
    async fn lock_entries_are_evicted_after_release() {
        let (service, store, _rx) = service_with_store();
        let order = Order::new(
            Uuid::new_v4(),
            vec![LineItem {
                variation_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: dec!(5.00),
            }],
            CustomerContact {
                email: "evict@example.com".into(),
                name: "Evict Test".into(),
            },
        )
        .unwrap();
        let order_id = order.id;
        store.insert_order(order);
        let actor = Uuid::new_v4();

        service.verify_payment(order_id, actor).await.unwrap();
        assert!(service.order_locks.is_empty());

        // failed transitions release and evict too
        let _ = service.verify_payment(Uuid::new_v4(), actor).await;
        assert!(service.order_locks.is_empty());
        let _ = service.cancel_refund(Uuid::new_v4(), actor).await;
        assert!(service.refund_locks.is_empty());
    }
}
