use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use crate::errors::FulfillmentError;
use crate::models::audit::{AuditRecord, EntityKind, TransitionOutcome};
use crate::storage::AuditSink;

/// Append-only trail of attempted transitions.
///
/// Failed attempts are recorded too; reconciliation depends on seeing them.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Appends a record, propagating sink failures. Used on success paths
    /// where the caller wants to know the trail is intact.
    pub async fn record(&self, record: AuditRecord) -> Result<(), FulfillmentError> {
        self.sink.append(record).await?;
        Ok(())
    }

    /// Appends a record for a failed or partial attempt. A sink failure
    /// here is logged rather than returned so it cannot mask the
    /// transition error the caller is about to surface.
    pub async fn record_attempt(&self, record: AuditRecord) {
        let entity_id = record.entity_id;
        if let Err(e) = self.sink.append(record).await {
            error!(%entity_id, error = %e, "failed to append audit record for attempted transition");
        }
    }

    pub async fn succeeded(
        &self,
        entity_kind: EntityKind,
        entity_id: Uuid,
        actor: Uuid,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        reason: Option<String>,
    ) -> Result<(), FulfillmentError> {
        self.record(AuditRecord::new(
            entity_kind,
            entity_id,
            actor,
            from_state,
            to_state,
            TransitionOutcome::Succeeded,
            reason,
        ))
        .await
    }

    pub async fn failed(
        &self,
        entity_kind: EntityKind,
        entity_id: Uuid,
        actor: Uuid,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.record_attempt(AuditRecord::new(
            entity_kind,
            entity_id,
            actor,
            from_state,
            to_state,
            TransitionOutcome::Failed,
            Some(reason.into()),
        ))
        .await;
    }

    /// Records the notified-but-uncommitted shipment anomaly for operator
    /// follow-up.
    pub async fn partial(
        &self,
        entity_kind: EntityKind,
        entity_id: Uuid,
        actor: Uuid,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.record_attempt(AuditRecord::new(
            entity_kind,
            entity_id,
            actor,
            from_state,
            to_state,
            TransitionOutcome::Partial,
            Some(reason.into()),
        ))
        .await;
    }
}
