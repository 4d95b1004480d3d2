//! Infrastructure for the procurement core: append-only event store,
//! the transition service (atomic unit of work per transition), and the
//! status-history read model.

pub mod event_store;
pub mod history;
pub mod service;

pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use history::{HistoryError, StatusHistoryEntry, status_history};
pub use service::{
    ConfirmPaymentRequest, CreateOrderRequest, ProcurementService, ReportReceiptRequest,
    TransitionError, TransitionOutcome,
};

#[cfg(test)]
mod integration_tests;
