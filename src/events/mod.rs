use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted after a transition has committed. Downstream consumers
/// (projections, webhooks, analytics) subscribe to these; the state
/// machines never depend on them being delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PaymentVerified {
        order_id: Uuid,
    },
    PaymentRejected {
        order_id: Uuid,
        reason: String,
    },
    PaymentReminderSent {
        order_id: Uuid,
    },
    OrderShipped {
        order_id: Uuid,
        tracking_number: String,
    },
    ShippingCompleted {
        order_id: Uuid,
    },
    ShippingCancelled {
        order_id: Uuid,
    },
    RefundCompleted {
        refund_id: Uuid,
        order_id: Uuid,
    },
    RefundCancelled {
        refund_id: Uuid,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Stand-in consumer for
/// deployments that have not wired a real downstream yet.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "event processed");
    }
}
