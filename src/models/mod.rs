pub mod audit;
pub mod order;
pub mod refund;

pub use audit::{AuditRecord, EntityKind, TransitionOutcome};
pub use order::{CustomerContact, FulfillmentStatus, LineItem, Order, PaymentStatus};
pub use refund::{RefundItem, RefundRequest, RefundStatus};
