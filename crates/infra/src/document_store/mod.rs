//! Transactional document store boundary.
//!
//! Documents are JSON bodies in named collections, versioned for optimistic
//! concurrency. Creating a document in the event-log collection fires a
//! trigger: [`PublishingDocumentStore`] publishes one envelope per created
//! event document after the commit succeeds.

pub mod document;
pub mod in_memory;
pub mod query;
pub mod r#trait;

pub use document::{Collection, Document, StoredDocument, encode, to_json};
pub use in_memory::InMemoryDocumentStore;
pub use query::{Filter, Query};
pub use r#trait::{Commit, CommitReceipt, DocumentStore, ReadRecord, StoreError, WriteOp};

use fabline_events::{EventBus, EventEnvelope};
use fabline_production::ProductionEventRecord;

/// Trigger message for a newly created event-log document.
pub type EventTrigger = EventEnvelope<serde_json::Value>;

/// Adapter that publishes created event documents to an `EventBus` after a
/// successful commit.
///
/// Publish happens only after the commit succeeds; a failed commit triggers
/// nothing.
#[derive(Debug)]
pub struct PublishingDocumentStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingDocumentStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> DocumentStore for PublishingDocumentStore<S, B>
where
    S: DocumentStore,
    B: EventBus<EventTrigger>,
{
    fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.store.get(collection, key)
    }

    fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        self.store.query(query)
    }

    fn commit(&self, commit: Commit) -> Result<CommitReceipt, StoreError> {
        let receipt = self.store.commit(commit)?;

        for created in receipt.created.iter().filter(|d| d.collection == Collection::Events) {
            let record: ProductionEventRecord = created.decode()?;
            let trigger = EventEnvelope::new(
                record.id,
                record.kind,
                created.sequence,
                record.created_at,
                record.payload,
            );
            self.bus
                .publish(trigger)
                .map_err(|err| StoreError::Publish(format!("{err:?}")))?;
        }

        Ok(receipt)
    }
}
