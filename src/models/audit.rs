use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which entity a transition was attempted against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum EntityKind {
    Order,
    Refund,
}

/// Outcome of an attempted transition.
///
/// `Partial` is reserved for the one knowingly non-atomic spot in the
/// lifecycle: a shipment notification went out but the inventory commit
/// failed afterwards. Those records need operator follow-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum TransitionOutcome {
    Succeeded,
    Failed,
    Partial,
}

/// Immutable log entry for one attempted transition, failed or not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub from_state: String,
    pub to_state: String,
    pub actor: Uuid,
    pub timestamp: DateTime<Utc>,
    pub outcome: TransitionOutcome,
    pub reason: Option<String>,
}

impl AuditRecord {
    pub fn new(
        entity_kind: EntityKind,
        entity_id: Uuid,
        actor: Uuid,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        outcome: TransitionOutcome,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_kind,
            entity_id,
            from_state: from_state.into(),
            to_state: to_state.into(),
            actor,
            timestamp: Utc::now(),
            outcome,
            reason,
        }
    }
}
