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
    models::{
        audit::EntityKind,
        order::{CustomerContact, Order},
        refund::{RefundRequest, RefundStatus},
    },
    notifications::{NotificationError, NotificationPort},
    services::TransitionSettings,
    storage::{OrderStore, RefundStore},
};

lazy_static! {
    static ref REFUNDS_COMPLETED: IntCounter = IntCounter::new(
        "refunds_completed_total",
        "Total number of refunds completed"
    )
    .expect("metric can be created");
    static ref REFUNDS_CANCELLED: IntCounter = IntCounter::new(
        "refunds_cancelled_total",
        "Total number of refunds cancelled"
    )
    .expect("metric can be created");
    static ref REFUND_TRANSITION_FAILURES: IntCounter = IntCounter::new(
        "refund_transition_failures_total",
        "Total number of failed refund transitions"
    )
    .expect("metric can be created");
}

/// The refund request state machine.
///
/// Drives `Processing -> Completed` and `Processing -> Cancelled`; both
/// targets are terminal. Reversing a completed refund needs an
/// administrative override path that does not exist in this core. The
/// ledger is never touched: returned-stock re-entry is out of scope.
#[derive(Clone)]
pub struct RefundStateMachine {
    refunds: Arc<dyn RefundStore>,
    orders: Arc<dyn OrderStore>,
    notifier: Arc<dyn NotificationPort>,
    audit: AuditTrail,
    events: EventSender,
    settings: TransitionSettings,
}

impl RefundStateMachine {
    pub fn new(
        refunds: Arc<dyn RefundStore>,
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn NotificationPort>,
        audit: AuditTrail,
        events: EventSender,
        settings: TransitionSettings,
    ) -> Self {
        Self {
            refunds,
            orders,
            notifier,
            audit,
            events,
            settings,
        }
    }

    /// Completes a processing refund (commit-after-send).
    #[instrument(skip(self), fields(refund_id = %refund_id))]
    pub async fn complete_refund(
        &self,
        refund_id: Uuid,
        actor: Uuid,
    ) -> Result<RefundRequest, FulfillmentError> {
        let (mut refund, order) = self.load(refund_id).await?;
        let from = refund.status;
        let to = RefundStatus::Completed.to_string();

        if from != RefundStatus::Processing {
            return Err(self
                .fail(
                    refund_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidTransition(format!(
                        "cannot complete refund {} in status {}",
                        refund_id, from
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Refund processed",
                &format!(
                    "Hi {}, your refund of {} for order {} has been processed.",
                    order.customer_contact.name, refund.total_amount, order.id
                ),
            )
            .await
        {
            return Err(self.fail(refund_id, actor, from.to_string(), to, e).await);
        }

        refund.status = RefundStatus::Completed;
        self.persist(&mut refund).await?;
        self.audit
            .succeeded(
                EntityKind::Refund,
                refund_id,
                actor,
                from.to_string(),
                RefundStatus::Completed.to_string(),
                None,
            )
            .await?;
        self.emit(Event::RefundCompleted {
            refund_id,
            order_id: order.id,
        })
        .await;
        REFUNDS_COMPLETED.inc();

        info!(%refund_id, "refund completed");
        Ok(refund)
    }

    /// Cancels a processing refund (commit-after-send). Cancellation
    /// releases the refund's claim on the order's line-item quantities.
    #[instrument(skip(self), fields(refund_id = %refund_id))]
    pub async fn cancel_refund(
        &self,
        refund_id: Uuid,
        actor: Uuid,
    ) -> Result<RefundRequest, FulfillmentError> {
        let (mut refund, order) = self.load(refund_id).await?;
        let from = refund.status;
        let to = RefundStatus::Cancelled.to_string();

        if from != RefundStatus::Processing {
            return Err(self
                .fail(
                    refund_id,
                    actor,
                    from.to_string(),
                    to,
                    FulfillmentError::InvalidTransition(format!(
                        "cannot cancel refund {} in status {}",
                        refund_id, from
                    )),
                )
                .await);
        }

        if let Err(e) = self
            .notify(
                &order.customer_contact,
                "Refund request cancelled",
                &format!(
                    "Hi {}, the refund request for your order {} has been cancelled.",
                    order.customer_contact.name, order.id
                ),
            )
            .await
        {
            return Err(self.fail(refund_id, actor, from.to_string(), to, e).await);
        }

        refund.status = RefundStatus::Cancelled;
        self.persist(&mut refund).await?;
        self.audit
            .succeeded(
                EntityKind::Refund,
                refund_id,
                actor,
                from.to_string(),
                RefundStatus::Cancelled.to_string(),
                None,
            )
            .await?;
        self.emit(Event::RefundCancelled {
            refund_id,
            order_id: order.id,
        })
        .await;
        REFUNDS_CANCELLED.inc();

        info!(%refund_id, "refund cancelled");
        Ok(refund)
    }

    async fn load(&self, refund_id: Uuid) -> Result<(RefundRequest, Order), FulfillmentError> {
        let refund = self
            .refunds
            .load(refund_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("Refund {} not found", refund_id)))?;
        let order = self.orders.load(refund.order_id).await?.ok_or_else(|| {
            FulfillmentError::NotFound(format!(
                "Order {} referenced by refund {} not found",
                refund.order_id, refund_id
            ))
        })?;
        Ok((refund, order))
    }

    async fn persist(&self, refund: &mut RefundRequest) -> Result<(), FulfillmentError> {
        refund.touch();
        self.refunds.save(refund).await?;
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

    async fn fail(
        &self,
        refund_id: Uuid,
        actor: Uuid,
        from_state: String,
        to_state: String,
        err: FulfillmentError,
    ) -> FulfillmentError {
        REFUND_TRANSITION_FAILURES.inc();
        self.audit
            .failed(
                EntityKind::Refund,
                refund_id,
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
