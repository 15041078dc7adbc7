use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::errors::FulfillmentError;

/// Enum representing the possible payment statuses of an order.
///
/// `Verified` and `Refunded` are terminal for the payment track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum PaymentStatus {
    Pending,
    Verified,
    Refunded,
}

/// Enum representing the possible fulfillment statuses of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum FulfillmentStatus {
    Pending,
    Preparing,
    Shipped,
    Completed,
}

/// A single order line: one variation at a fixed quantity and unit price.
/// Line items are immutable once the order exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub variation_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Contact details used for every transactional notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct CustomerContact {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub name: String,
}

/// An order in the fulfillment lifecycle.
///
/// Created once by checkout with both statuses `Pending`; all subsequent
/// mutation goes through the order state machine. Never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub line_items: Vec<LineItem>,
    /// Set only while the order is `Shipped`; cleared when shipping is
    /// cancelled.
    pub tracking_number: Option<String>,
    pub customer_contact: CustomerContact,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every save.
    pub version: u64,
}

impl Order {
    /// Creates a new order in the initial state.
    ///
    /// Line items must be non-empty with strictly positive quantities and
    /// the contact must be well formed; checkout is expected to hand us
    /// validated data but we refuse malformed input here as well.
    pub fn new(
        id: Uuid,
        line_items: Vec<LineItem>,
        customer_contact: CustomerContact,
    ) -> Result<Self, FulfillmentError> {
        customer_contact
            .validate()
            .map_err(|e| FulfillmentError::ValidationError(e.to_string()))?;

        if line_items.is_empty() {
            return Err(FulfillmentError::ValidationError(
                "order must have at least one line item".into(),
            ));
        }
        for item in &line_items {
            if item.quantity <= 0 {
                return Err(FulfillmentError::ValidationError(format!(
                    "line item {} has non-positive quantity {}",
                    item.variation_id, item.quantity
                )));
            }
        }

        let now = Utc::now();
        Ok(Self {
            id,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::Pending,
            line_items,
            tracking_number: None,
            customer_contact,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Ordered quantity for a variation, summed across line items.
    pub fn ordered_quantity(&self, variation_id: Uuid) -> i32 {
        self.line_items
            .iter()
            .filter(|item| item.variation_id == variation_id)
            .map(|item| item.quantity)
            .sum()
    }

    /// Unit price for a variation, if the order contains it.
    pub fn unit_price(&self, variation_id: Uuid) -> Option<Decimal> {
        self.line_items
            .iter()
            .find(|item| item.variation_id == variation_id)
            .map(|item| item.unit_price)
    }

    pub fn contains_variation(&self, variation_id: Uuid) -> bool {
        self.line_items
            .iter()
            .any(|item| item.variation_id == variation_id)
    }

    /// Marks the entity as modified ahead of a save.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn contact() -> CustomerContact {
        CustomerContact {
            email: "jamie@example.com".into(),
            name: "Jamie".into(),
        }
    }

    #[test]
    fn new_order_starts_pending() {
        let order = Order::new(
            Uuid::new_v4(),
            vec![LineItem {
                variation_id: Uuid::new_v4(),
                quantity: 2,
                unit_price: dec!(19.99),
            }],
            contact(),
        )
        .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Pending);
        assert!(order.tracking_number.is_none());
        assert_eq!(order.version, 0);
    }

    #[test]
    fn rejects_empty_line_items() {
        let err = Order::new(Uuid::new_v4(), vec![], contact()).unwrap_err();
        assert!(matches!(err, FulfillmentError::ValidationError(_)));
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let err = Order::new(
            Uuid::new_v4(),
            vec![LineItem {
                variation_id: Uuid::new_v4(),
                quantity: 0,
                unit_price: dec!(5.00),
            }],
            contact(),
        )
        .unwrap_err();
        assert!(matches!(err, FulfillmentError::ValidationError(_)));
    }

    #[test]
    fn rejects_bad_email() {
        let err = Order::new(
            Uuid::new_v4(),
            vec![LineItem {
                variation_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: dec!(5.00),
            }],
            CustomerContact {
                email: "not-an-email".into(),
                name: "Jamie".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, FulfillmentError::ValidationError(_)));
    }

    #[test]
    fn ordered_quantity_sums_duplicate_variations() {
        let v = Uuid::new_v4();
        let order = Order::new(
            Uuid::new_v4(),
            vec![
                LineItem {
                    variation_id: v,
                    quantity: 2,
                    unit_price: dec!(10.00),
                },
                LineItem {
                    variation_id: v,
                    quantity: 3,
                    unit_price: dec!(10.00),
                },
            ],
            contact(),
        )
        .unwrap();
        assert_eq!(order.ordered_quantity(v), 5);
        assert_eq!(order.ordered_quantity(Uuid::new_v4()), 0);
    }
}
