//! Fulfillment Core Library
//!
//! Centralizes the order fulfillment lifecycle of a retail order-management
//! system: payment verification, preparation, shipping, completion, and
//! refunds. All status mutation flows through guarded state machines with
//! per-entity locking, an idempotent inventory ledger, and an append-only
//! audit trail. Storage and notification transports are collaborators
//! behind traits.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod audit;
pub mod config;
pub mod errors;
pub mod events;
pub mod inventory;
pub mod models;
pub mod notifications;
pub mod services;
pub mod storage;

pub use audit::AuditTrail;
pub use config::AppConfig;
pub use errors::FulfillmentError;
pub use inventory::{InventoryLedger, LedgerError};
pub use models::{
    AuditRecord, CustomerContact, EntityKind, FulfillmentStatus, LineItem, Order, PaymentStatus,
    RefundItem, RefundRequest, RefundStatus, TransitionOutcome,
};
pub use notifications::{NotificationError, NotificationPort};
pub use services::{FulfillmentService, OrderStateMachine, RefundStateMachine};
pub use storage::{AuditSink, InMemoryStore, OrderStore, RefundStore, StorageError};
