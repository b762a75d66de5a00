use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabline_core::EventId;

/// Envelope for a newly created event-log document.
///
/// This is the unit the document store's trigger mechanism publishes once per
/// created event document; consumers use `event_id` to load and process it
/// inside their own transaction.
///
/// Notes:
/// - **Append-only**: `sequence_number` is the store's commit sequence, monotonically
///   increasing across the whole event log.
/// - `payload` is the event body as written (kind-specific, not yet validated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,
    event_type: String,

    /// Monotonically increasing position in the event log.
    sequence_number: u64,

    created_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: EventId,
        event_type: impl Into<String>,
        sequence_number: u64,
        created_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            sequence_number,
            created_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
