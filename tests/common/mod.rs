#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fulfillment_core::{
    config::AppConfig,
    events::{self, EventSender},
    models::order::{CustomerContact, LineItem, Order},
    notifications::{NotificationError, NotificationPort},
    FulfillmentService, InMemoryStore, InventoryLedger,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A recorded outbound message: (recipient email, subject).
pub type SentMessage = (String, String);

/// Notification stub with a switchable health flag so tests can exercise
/// the commit-after-send rule in both directions.
pub struct StubNotifier {
    healthy: AtomicBool,
    delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<SentMessage>>,
    attempts: AtomicUsize,
}

impl StubNotifier {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            delay: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Makes every subsequent send stall for the given duration before
    /// answering, for exercising dispatch timeouts and lock contention.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("stub notifier lock") = Some(delay);
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("stub notifier lock").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("stub notifier lock").len()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationPort for StubNotifier {
    async fn send(
        &self,
        recipient: &CustomerContact,
        subject: &str,
        _text_body: &str,
        _html_body: &str,
    ) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("stub notifier lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery("smtp relay down".into()));
        }
        self.sent
            .lock()
            .expect("stub notifier lock")
            .push((recipient.email.clone(), subject.to_string()));
        Ok(())
    }
}

/// Helper harness wiring a fulfillment service to in-memory collaborators.
pub struct TestApp {
    pub service: FulfillmentService,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<StubNotifier>,
    pub ledger: Arc<InventoryLedger>,
    pub actor: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Same harness with adjusted budgets, for timeout and contention tests.
    pub fn with_config(config: AppConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();

        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(StubNotifier::new());
        let ledger = Arc::new(InventoryLedger::new());
        let (tx, rx) = mpsc::channel(64);
        let event_task = tokio::spawn(events::process_events(rx));

        let service = FulfillmentService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            ledger.clone(),
            EventSender::new(tx),
            &config,
        );

        Self {
            service,
            store,
            notifier,
            ledger,
            actor: Uuid::new_v4(),
            _event_task: event_task,
        }
    }

    /// Seeds an order with the given (quantity, unit_price) lines plus
    /// matching ledger stock, returning the order id and variation ids.
    pub async fn seed_order(&self, lines: &[(i32, Decimal, i32)]) -> (Uuid, Vec<Uuid>) {
        let mut line_items = Vec::new();
        let mut variations = Vec::new();
        for &(quantity, unit_price, stock) in lines {
            let variation_id = Uuid::new_v4();
            self.ledger.set_stock(variation_id, stock).await;
            line_items.push(LineItem {
                variation_id,
                quantity,
                unit_price,
            });
            variations.push(variation_id);
        }
        let order = Order::new(Uuid::new_v4(), line_items, contact()).expect("valid test order");
        let order_id = order.id;
        self.store.insert_order(order);
        (order_id, variations)
    }
}

pub fn contact() -> CustomerContact {
    CustomerContact {
        email: "customer@example.com".into(),
        name: "Alex Customer".into(),
    }
}
