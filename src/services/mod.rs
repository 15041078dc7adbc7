use std::time::Duration;

use crate::config::AppConfig;

pub mod fulfillment;
pub mod orders;
pub mod refunds;

pub use fulfillment::FulfillmentService;
pub use orders::OrderStateMachine;
pub use refunds::RefundStateMachine;

/// Timeouts and validation bounds shared by the state machines, derived
/// from `AppConfig`.
#[derive(Clone, Debug)]
pub struct TransitionSettings {
    pub notification_timeout: Duration,
    pub ledger_timeout: Duration,
    pub min_reason_length: usize,
}

impl From<&AppConfig> for TransitionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            notification_timeout: config.notification_timeout(),
            ledger_timeout: config.ledger_timeout(),
            min_reason_length: config.min_reason_length,
        }
    }
}
