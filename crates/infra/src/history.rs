//! Status-history read model.
//!
//! The order's event stream IS its history; this module folds the raw
//! stream into `StatusHistoryEntry` rows without rehydrating the aggregate,
//! so the history stays readable independently of the order's current-state
//! representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kontor_core::UserId;
use kontor_events::Event;
use kontor_procurement::{OrderEvent, OrderStatus, PurchaseOrderId};

use crate::event_store::{EventStore, EventStoreError};

/// One status transition, as recorded in the order's append-only stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// `None` for the creation entry.
    pub previous_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub comment: Option<String>,
    pub actor: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("event store failure: {0}")]
    Store(#[from] EventStoreError),

    #[error("failed to decode stored events: {0}")]
    Deserialize(String),
}

/// Fold an order's stream into its status history, oldest first.
pub fn status_history<S: EventStore>(
    store: &S,
    order_id: PurchaseOrderId,
) -> Result<Vec<StatusHistoryEntry>, HistoryError> {
    let mut stream = store.load_stream(order_id.0)?;
    stream.sort_by_key(|e| e.sequence_number);

    let mut previous = None;
    let mut entries = Vec::new();

    for stored in stream {
        let event: OrderEvent = serde_json::from_value(stored.payload)
            .map_err(|e| HistoryError::Deserialize(e.to_string()))?;

        if let Some(new_status) = event.status_change() {
            entries.push(StatusHistoryEntry {
                previous_status: previous,
                new_status,
                comment: event.comment().map(str::to_string),
                actor: event.actor(),
                timestamp: event.occurred_at(),
            });
            previous = Some(new_status);
        }
    }

    Ok(entries)
}
