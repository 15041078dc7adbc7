use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::order::CustomerContact;

/// Notification dispatch errors.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound transactional messaging, treated as a black box.
///
/// The fulfillment core only relies on the call contract: a transition that
/// requires a customer notification is committed only after `send` returns
/// `Ok` (commit-after-send). Message content and transport belong to the
/// implementor.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send(
        &self,
        recipient: &CustomerContact,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), NotificationError>;
}
