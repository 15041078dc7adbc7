use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::order::LineItem;

/// Inventory ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown variation {0}")]
    UnknownVariation(Uuid),
    #[error("insufficient stock for variation {variation_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variation_id: Uuid,
        requested: i32,
        available: i32,
    },
    #[error("ledger commit timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Per-variation stock counts with an idempotent shipment commit.
///
/// Stock is decremented exactly once per order, at ship time. There is no
/// reservation step: holding stock against unpaid orders is an explicit
/// non-feature.
#[derive(Debug, Default)]
pub struct InventoryLedger {
    stock: DashMap<Uuid, Arc<Mutex<i32>>>,
    /// Per-order shipped markers. Idempotency is decided here, never by
    /// inferring from stock levels, which move for unrelated reasons too.
    committed: DashMap<Uuid, DateTime<Utc>>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the available quantity for a variation, creating it if needed.
    /// Management surface for receiving and corrections.
    pub async fn set_stock(&self, variation_id: Uuid, quantity: i32) {
        let cell = self
            .stock
            .entry(variation_id)
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .value()
            .clone();
        *cell.lock().await = quantity.max(0);
    }

    /// Current available quantity, `None` for unknown variations.
    pub async fn available(&self, variation_id: Uuid) -> Option<i32> {
        let cell = self
            .stock
            .get(&variation_id)
            .map(|entry| entry.value().clone())?;
        let quantity = *cell.lock().await;
        Some(quantity)
    }

    /// Whether a shipment was already committed for this order.
    pub fn is_committed(&self, order_id: Uuid) -> bool {
        self.committed.contains_key(&order_id)
    }

    /// Commits the stock decrement for a shipped order.
    ///
    /// Idempotent per `order_id`: a repeat call for an order that already
    /// committed returns `Ok` without touching stock. The batch is
    /// all-or-nothing: every line is validated against available stock
    /// before any decrement, and a single shortfall rejects the whole
    /// batch. Variation locks are taken in ascending id order so two
    /// commits over overlapping variation sets cannot deadlock.
    #[instrument(skip(self, line_items), fields(order_id = %order_id, lines = line_items.len()))]
    pub async fn commit_shipment(
        &self,
        order_id: Uuid,
        line_items: &[LineItem],
    ) -> Result<(), LedgerError> {
        if self.committed.contains_key(&order_id) {
            info!(%order_id, "shipment already committed, skipping decrement");
            return Ok(());
        }

        // Aggregate per variation; the same variation may appear on
        // several lines.
        let mut needed: BTreeMap<Uuid, i32> = BTreeMap::new();
        for item in line_items {
            *needed.entry(item.variation_id).or_insert(0) += item.quantity;
        }

        let mut cells = Vec::with_capacity(needed.len());
        for (&variation_id, &quantity) in &needed {
            let cell = self
                .stock
                .get(&variation_id)
                .map(|entry| entry.value().clone())
                .ok_or(LedgerError::UnknownVariation(variation_id))?;
            cells.push((variation_id, quantity, cell));
        }

        // BTreeMap iteration gave us ascending variation ids; lock in that
        // fixed global order.
        let mut guards = Vec::with_capacity(cells.len());
        for (_, _, cell) in &cells {
            guards.push(cell.lock().await);
        }

        // A racing commit for the same order may have landed while this
        // call waited on the variation locks. The marker is inserted under
        // the same locks, so re-checking here is race-free.
        if self.committed.contains_key(&order_id) {
            info!(%order_id, "shipment committed by a concurrent call, skipping decrement");
            return Ok(());
        }

        for (index, (variation_id, quantity, _)) in cells.iter().enumerate() {
            let available = *guards[index];
            if available < *quantity {
                warn!(
                    %order_id,
                    %variation_id,
                    requested = quantity,
                    available,
                    "rejecting shipment commit, would drive stock negative"
                );
                return Err(LedgerError::InsufficientStock {
                    variation_id: *variation_id,
                    requested: *quantity,
                    available,
                });
            }
        }

        for (index, (_, quantity, _)) in cells.iter().enumerate() {
            *guards[index] -= *quantity;
        }
        self.committed.insert(order_id, Utc::now());

        info!(%order_id, variations = cells.len(), "shipment committed");
        Ok(())
    }
}
