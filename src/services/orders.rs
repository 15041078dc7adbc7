use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    audit::AuditTrail,
    errors::FulfillmentError,
    events::{Event, EventSender},
    inventory::{InventoryLedger, LedgerError},
    models::{
        audit::EntityKind,
        order::{CustomerContact, FulfillmentStatus, Order, PaymentStatus},
    },
    notifications::{NotificationError, NotificationPort},
    services::TransitionSettings,
    storage::OrderStore,
};

lazy_static! {
    static ref PAYMENTS_VERIFIED: IntCounter = IntCounter::new(
        "payments_verified_total",
        "Total number of payments verified"
    )
    .expect("metric can be created");
    static ref PAYMENTS_REJECTED: IntCounter = IntCounter::new(
        "payments_rejected_total",
        "Total number of payments rejected"
    )
    .expect("metric can be created");
    static ref ORDERS_SHIPPED: IntCounter =
        IntCounter::new("orders_shipped_total", "Total number of orders shipped")
            .expect("metric can be created");
    static ref ORDER_TRANSITION_FAILURES: IntCounter = IntCounter::new(
        "order_transition_failures_total",
        "Total number of failed order transitions"
    )
    .expect("metric can be created");
}

/// The order fulfillment state machine.
///
/// Owns both status tracks of an order and every side effect attached to
/// their transitions. Transitions follow commit-after-send: the customer
/// notification must succeed before any durable mutation. The one
/// documented exception is `begin_shipping`, where a ledger failure after
/// a successful notification leaves a `Partial` audit record instead
/// (see `begin_shipping`).
///
/// This type does not serialize access per order; callers go through
/// `FulfillmentService`, which does.
#[derive(Clone)]
pub struct OrderStateMachine {
    orders: Arc<dyn OrderStore>,
    notifier: Arc<dyn NotificationPort>,
    ledger: Arc<InventoryLedger>,
    audit: AuditTrail,
    events: EventSender,
    settings: TransitionSettings,
}

impl OrderStateMachine {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn NotificationPort>,
        ledger: Arc<InventoryLedger>,
        audit: AuditTrail,
        events: EventSender,
        settings: TransitionSettings,
    ) -> Self {
        Self {
            orders,
            notifier,
            ledger,
            audit,
            events,
            settings,
        }
    }

    /// Verifies a pending payment.
    ///
    /// The customer is notified first; only if that succeeds does the
    /// order move to `payment_status = Verified` and
    /// `fulfillment_status = Preparing`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn verify_payment(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let mut order = self.load_order(order_id).await?;
        let from = order.payment_status;

        if from != PaymentStatus::Pending {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    PaymentStatus::Verified.to_string(),
                    FulfillmentError::InvalidTransition(format!(
                        "cannot verify payment for order {} in payment status {}",
                        order_id, from
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Payment verified",
                &format!(
                    "Hi {}, the payment for your order {} has been verified. \
                     We are preparing it for shipment.",
                    order.customer_contact.name, order.id
                ),
            )
            .await
        {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    PaymentStatus::Verified.to_string(),
                    e,
                )
                .await);
        }

        order.payment_status = PaymentStatus::Verified;
        order.fulfillment_status = FulfillmentStatus::Preparing;
        self.persist(&mut order).await?;
        self.audit
            .succeeded(
                EntityKind::Order,
                order_id,
                actor,
                from.to_string(),
                PaymentStatus::Verified.to_string(),
                None,
            )
            .await?;
        self.emit(Event::PaymentVerified { order_id }).await;
        PAYMENTS_VERIFIED.inc();

        info!(%order_id, "payment verified");
        Ok(order)
    }

    /// Rejects a pending payment with a mandatory reason, moving the
    /// payment track to its `Refunded` terminal state.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn reject_payment(
        &self,
        order_id: Uuid,
        actor: Uuid,
        reason: &str,
    ) -> Result<Order, FulfillmentError> {
        let mut order = self.load_order(order_id).await?;
        let from = order.payment_status;
        let to = PaymentStatus::Refunded.to_string();

        if from != PaymentStatus::Pending {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidTransition(format!(
                        "cannot reject payment for order {} in payment status {}",
                        order_id, from
                    )),
                )
                .await);
        }

        let reason = reason.trim();
        if reason.len() < self.settings.min_reason_length {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidReason(format!(
                        "rejection reason must be at least {} characters",
                        self.settings.min_reason_length
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Payment rejected",
                &format!(
                    "Hi {}, the payment for your order {} could not be accepted: {}. \
                     Any captured amount will be refunded.",
                    order.customer_contact.name, order.id, reason
                ),
            )
            .await
        {
            return Err(self.fail(order_id, actor, from.to_string(), to, e).await);
        }

        order.payment_status = PaymentStatus::Refunded;
        self.persist(&mut order).await?;
        self.audit
            .succeeded(
                EntityKind::Order,
                order_id,
                actor,
                from.to_string(),
                PaymentStatus::Refunded.to_string(),
                Some(reason.to_string()),
            )
            .await?;
        self.emit(Event::PaymentRejected {
            order_id,
            reason: reason.to_string(),
        })
        .await;
        PAYMENTS_REJECTED.inc();

        info!(%order_id, "payment rejected");
        Ok(order)
    }

    /// Sends a payment reminder for an order whose payment is still
    /// pending. An informational nudge, not a transition: the payment
    /// status is left untouched and the audit trail records from == to.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_insufficient_payment(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let order = self.load_order(order_id).await?;
        let from = order.payment_status;

        if from != PaymentStatus::Pending {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    from.to_string(),
                    FulfillmentError::InvalidTransition(format!(
                        "cannot send payment reminder for order {} in payment status {}",
                        order_id, from
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Payment incomplete",
                &format!(
                    "Hi {}, the payment received for your order {} does not cover \
                     the full amount. Please settle the remaining balance.",
                    order.customer_contact.name, order.id
                ),
            )
            .await
        {
            return Err(self
                .fail(order_id, actor, from.to_string(), from.to_string(), e)
                .await);
        }

        self.audit
            .succeeded(
                EntityKind::Order,
                order_id,
                actor,
                from.to_string(),
                from.to_string(),
                Some("payment reminder sent".to_string()),
            )
            .await?;
        self.emit(Event::PaymentReminderSent { order_id }).await;

        info!(%order_id, "payment reminder sent");
        Ok(order)
    }

    /// Records a shipment: `Preparing -> Shipped` with the stock decrement.
    ///
    /// `checked_items` must cover every variation on the order; partial
    /// picks are rejected before any side effect. The notification is
    /// deliberately dispatched before the ledger commit, per the domain
    /// rule that the customer is always informed before physical state is
    /// committed. If the ledger then fails, the order stays `Preparing`
    /// and the audit trail gets a `Partial` record: the customer was told
    /// the order shipped but stock never moved, which an operator has to
    /// reconcile by hand.
    #[instrument(skip(self, checked_items), fields(order_id = %order_id))]
    pub async fn begin_shipping(
        &self,
        order_id: Uuid,
        actor: Uuid,
        tracking_number: &str,
        checked_items: &HashSet<Uuid>,
    ) -> Result<Order, FulfillmentError> {
        let mut order = self.load_order(order_id).await?;
        let from = order.fulfillment_status;
        let to = FulfillmentStatus::Shipped.to_string();

        if from != FulfillmentStatus::Preparing {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidTransition(format!(
                        "cannot ship order {} in fulfillment status {}",
                        order_id, from
                    )),
                )
                .await);
        }
        if order.payment_status != PaymentStatus::Verified {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidTransition(format!(
                        "cannot ship order {} with payment status {}",
                        order_id, order.payment_status
                    )),
                )
                .await);
        }

        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::ValidationError(
                        "tracking number must not be empty".to_string(),
                    ),
                )
                .await);
        }

        let missing: Vec<Uuid> = order
            .line_items
            .iter()
            .map(|item| item.variation_id)
            .filter(|variation_id| !checked_items.contains(variation_id))
            .collect();
        if !missing.is_empty() {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::IncompletePick(format!(
                        "order {} has unchecked variations: {:?}",
                        order_id, missing
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Your order has shipped",
                &format!(
                    "Hi {}, your order {} is on its way. Tracking number: {}.",
                    order.customer_contact.name, order.id, tracking_number
                ),
            )
            .await
        {
            return Err(self
                .fail(order_id, actor, from.to_string(), to, e)
                .await);
        }

        if let Err(e) = self.commit_inventory(&order).await {
            // The customer was already notified; state stays Preparing
            // and the anomaly goes on the trail for manual follow-up.
            warn!(%order_id, error = %e, "ledger commit failed after shipment notification");
            ORDER_TRANSITION_FAILURES.inc();
            self.audit
                .partial(
                    EntityKind::Order,
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    format!("customer notified but inventory commit failed: {}", e),
                )
                .await;
            return Err(FulfillmentError::LedgerFailed(e));
        }

        order.fulfillment_status = FulfillmentStatus::Shipped;
        order.tracking_number = Some(tracking_number.to_string());
        self.persist(&mut order).await?;
        self.audit
            .succeeded(
                EntityKind::Order,
                order_id,
                actor,
                from.to_string(),
                FulfillmentStatus::Shipped.to_string(),
                None,
            )
            .await?;
        self.emit(Event::OrderShipped {
            order_id,
            tracking_number: tracking_number.to_string(),
        })
        .await;
        ORDERS_SHIPPED.inc();

        info!(%order_id, tracking_number, "order shipped");
        Ok(order)
    }

    /// Completes a shipped order: `Shipped -> Completed`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn complete_shipping(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let mut order = self.load_order(order_id).await?;
        let from = order.fulfillment_status;
        let to = FulfillmentStatus::Completed.to_string();

        if from != FulfillmentStatus::Shipped {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidTransition(format!(
                        "cannot complete order {} in fulfillment status {}",
                        order_id, from
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Order delivered",
                &format!(
                    "Hi {}, your order {} has been delivered. Thank you for shopping with us!",
                    order.customer_contact.name, order.id
                ),
            )
            .await
        {
            return Err(self.fail(order_id, actor, from.to_string(), to, e).await);
        }

        order.fulfillment_status = FulfillmentStatus::Completed;
        self.persist(&mut order).await?;
        self.audit
            .succeeded(
                EntityKind::Order,
                order_id,
                actor,
                from.to_string(),
                FulfillmentStatus::Completed.to_string(),
                None,
            )
            .await?;
        self.emit(Event::ShippingCompleted { order_id }).await;

        info!(%order_id, "order completed");
        Ok(order)
    }

    /// Reverts a premature shipment record: `Shipped -> Preparing`, tracking
    /// number cleared.
    ///
    /// The inventory commit is deliberately not reversed: once stock has
    /// left the building it is not un-shipped. A later `begin_shipping`
    /// finds the ledger already committed and skips the decrement.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_shipping(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<Order, FulfillmentError> {
        let mut order = self.load_order(order_id).await?;
        let from = order.fulfillment_status;
        let to = FulfillmentStatus::Preparing.to_string();

        if from != FulfillmentStatus::Shipped {
            return Err(self
                .fail(
                    order_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidTransition(format!(
                        "cannot cancel shipping for order {} in fulfillment status {}",
                        order_id, from
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Shipment update",
                &format!(
                    "Hi {}, the shipment record for your order {} was corrected. \
                     We will send new tracking details shortly.",
                    order.customer_contact.name, order.id
                ),
            )
            .await
        {
            return Err(self.fail(order_id, actor, from.to_string(), to, e).await);
        }

        order.fulfillment_status = FulfillmentStatus::Preparing;
        order.tracking_number = None;
        self.persist(&mut order).await?;
        self.audit
            .succeeded(
                EntityKind::Order,
                order_id,
                actor,
                from.to_string(),
                FulfillmentStatus::Preparing.to_string(),
                None,
            )
            .await?;
        self.emit(Event::ShippingCancelled { order_id }).await;

        info!(%order_id, "shipping cancelled");
        Ok(order)
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Order, FulfillmentError> {
        self.orders
            .load(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn persist(&self, order: &mut Order) -> Result<(), FulfillmentError> {
        order.touch();
        self.orders.save(order).await?;
        Ok(())
    }

    async fn notify(
        &self,
        recipient: &CustomerContact,
        subject: &str,
        text_body: &str,
    ) -> Result<(), FulfillmentError> {
        let html_body = format!("<p>{}</p>", text_body);
        match timeout(
            self.settings.notification_timeout,
            self.notifier
                .send(recipient, subject, text_body, &html_body),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FulfillmentError::NotificationFailed(e)),
            Err(_) => Err(FulfillmentError::NotificationFailed(
                NotificationError::Timeout(self.settings.notification_timeout),
            )),
        }
    }

    async fn commit_inventory(&self, order: &Order) -> Result<(), LedgerError> {
        match timeout(
            self.settings.ledger_timeout,
            self.ledger.commit_shipment(order.id, &order.line_items),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.settings.ledger_timeout)),
        }
    }

    /// Bumps the failure counter, writes the failed-attempt audit record,
    /// and hands the error back for returning.
    async fn fail(
        &self,
        order_id: Uuid,
        actor: Uuid,
        from_state: String,
        to_state: String,
        err: FulfillmentError,
    ) -> FulfillmentError {
        ORDER_TRANSITION_FAILURES.inc();
        self.audit
            .failed(
                EntityKind::Order,
                order_id,
                actor,
                from_state,
                to_state,
                err.to_string(),
            )
            .await;
        err
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.events.send(event).await {
            warn!(error = %e, "failed to emit event");
        }
    }
}
