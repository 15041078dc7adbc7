use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FulfillmentError;
use crate::models::order::Order;

/// Enum representing the possible statuses of a refund request.
///
/// `Completed` and `Cancelled` are both terminal; there is no direct path
/// back from `Completed` to `Processing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum RefundStatus {
    Processing,
    Completed,
    Cancelled,
}

/// One refunded variation with the quantity being returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundItem {
    pub variation_id: Uuid,
    pub quantity: i32,
}

/// A refund request against an order.
///
/// An order may carry several refund requests over distinct item subsets;
/// across all non-cancelled requests the refunded quantity per variation
/// never exceeds the ordered quantity. `total_amount` is derived from the
/// parent order's unit prices and is not independently mutable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: RefundStatus,
    pub items: Vec<RefundItem>,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl RefundRequest {
    /// Opens a refund request against `order`, checking the requested
    /// quantities against the ordered quantities minus what `siblings`
    /// (this order's other refund requests) already claim.
    ///
    /// Cancelled siblings release their claim; `Processing` and `Completed`
    /// ones hold it.
    pub fn open(
        id: Uuid,
        order: &Order,
        siblings: &[RefundRequest],
        items: Vec<RefundItem>,
    ) -> Result<Self, FulfillmentError> {
        if items.is_empty() {
            return Err(FulfillmentError::ValidationError(
                "refund request must contain at least one item".into(),
            ));
        }

        let mut claimed: HashMap<Uuid, i32> = HashMap::new();
        for sibling in siblings
            .iter()
            .filter(|r| r.order_id == order.id && r.status != RefundStatus::Cancelled)
        {
            for item in &sibling.items {
                *claimed.entry(item.variation_id).or_insert(0) += item.quantity;
            }
        }

        let mut requested: HashMap<Uuid, i32> = HashMap::new();
        for item in &items {
            if item.quantity <= 0 {
                return Err(FulfillmentError::ValidationError(format!(
                    "refund item {} has non-positive quantity {}",
                    item.variation_id, item.quantity
                )));
            }
            if !order.contains_variation(item.variation_id) {
                return Err(FulfillmentError::ValidationError(format!(
                    "variation {} is not part of order {}",
                    item.variation_id, order.id
                )));
            }
            *requested.entry(item.variation_id).or_insert(0) += item.quantity;
        }

        let mut total_amount = Decimal::ZERO;
        for (&variation_id, &quantity) in &requested {
            let ordered = order.ordered_quantity(variation_id);
            let already = claimed.get(&variation_id).copied().unwrap_or(0);
            if already + quantity > ordered {
                return Err(FulfillmentError::ValidationError(format!(
                    "refund for variation {} would exceed ordered quantity: \
                     {} ordered, {} already refunded, {} requested",
                    variation_id, ordered, already, quantity
                )));
            }
            // contains_variation was checked above, so the price exists
            if let Some(unit_price) = order.unit_price(variation_id) {
                total_amount += unit_price * Decimal::from(quantity);
            }
        }

        let now = Utc::now();
        Ok(Self {
            id,
            order_id: order.id,
            status: RefundStatus::Processing,
            items,
            total_amount,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Quantity of a variation claimed by this request.
    pub fn refunded_quantity(&self, variation_id: Uuid) -> i32 {
        self.items
            .iter()
            .filter(|item| item.variation_id == variation_id)
            .map(|item| item.quantity)
            .sum()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}
