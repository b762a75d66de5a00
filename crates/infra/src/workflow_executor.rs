//! Event processing pipeline.
//!
//! ```text
//! event id
//!   ↓
//! 1. Load the event document (skip if already processed)
//!   ↓
//! 2. Run its handler against a transaction-backed reader (all reads)
//!   ↓
//! 3. Stage the decision: document writes, emitted events (caused_by = this
//!    event), processed marker (all writes)
//!   ↓
//! 4. Commit; on conflict re-run from 1
//! ```
//!
//! Emitted events are new event-log documents, so a publishing store turns
//! each of them into a trigger for the next handler.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use fabline_core::EventId;
use fabline_orders::Order;
use fabline_production::event::OrderRef;
use fabline_production::{
    Decision, ProductionBatch, ProductionEvent, ProductionEventRecord, WorkflowError, Write, handle,
};

use crate::config::EngineConfig;
use crate::document_store::{DocumentStore, StoreError};
use crate::reader::TxReader;
use crate::transaction::{Transaction, run_transaction};

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The handler rejected the event; nothing was written.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("event {0} not found")]
    UnknownEvent(EventId),

    #[error("gave up after {attempts} conflicting attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The decision was committed. Idempotent no-ops land here with no writes.
    Applied { writes: usize, emitted: Vec<EventId> },
    /// The handler found nothing to act on; only the processed marker was written.
    Skipped { reason: String },
    /// An earlier delivery already handled this event.
    AlreadyProcessed,
}

/// Applies workflow decisions to a document store, one transaction per event.
#[derive(Debug)]
pub struct WorkflowExecutor<S> {
    store: S,
    config: EngineConfig,
}

impl<S> WorkflowExecutor<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append an externally produced event to the log.
    pub fn submit(&self, event: &ProductionEvent) -> Result<EventId, ExecutorError> {
        let record = ProductionEventRecord::new(event, None, Utc::now())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.submit_record(record)
    }

    /// Append a raw event document as a collaborator would write it.
    pub fn submit_record(&self, record: ProductionEventRecord) -> Result<EventId, ExecutorError> {
        let id = record.id;
        self.transact(|tx| Ok(tx.create(&record)?))?;
        debug!(event_id = %id, kind = %record.kind, "event submitted");
        Ok(id)
    }

    /// Store a new order and its `criacao_pedido` event together.
    pub fn submit_order(&self, order: &Order) -> Result<EventId, ExecutorError> {
        let event = ProductionEvent::OrderCreated(OrderRef { order_id: order.id });
        let record = ProductionEventRecord::new(&event, None, Utc::now())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let id = record.id;
        self.transact(|tx| {
            tx.create(order)?;
            tx.create(&record)?;
            Ok(())
        })?;
        info!(event_id = %id, order_id = %order.id, "order submitted");
        Ok(id)
    }

    /// Run the handler for one event document and commit its decision.
    ///
    /// Safe under redelivery: a processed event is reported as
    /// [`Outcome::AlreadyProcessed`] without touching anything.
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub fn process(&self, event_id: EventId) -> Result<Outcome, ExecutorError> {
        let policy = self.config.policy;

        let result = self.transact(|tx| {
            let Some(mut record) = tx.get::<ProductionEventRecord>(&event_id.to_string())? else {
                return Err(ExecutorError::UnknownEvent(event_id));
            };
            if record.processed {
                return Ok(Outcome::AlreadyProcessed);
            }

            let now = Utc::now();
            let decision = handle(&record, &mut TxReader::new(tx), policy, now)?;
            let outcome = stage(tx, &record, decision, now)?;

            record.mark_processed(now);
            tx.put(&record)?;
            Ok(outcome)
        });

        match &result {
            Ok(Outcome::AlreadyProcessed) => debug!("event already processed"),
            Ok(Outcome::Skipped { reason }) => warn!(%reason, "event skipped"),
            Ok(Outcome::Applied { writes, emitted }) => {
                info!(writes, emitted = emitted.len(), "event applied")
            }
            Err(err) => error!(error = %err, "event processing failed"),
        }
        result
    }

    fn transact<T>(
        &self,
        body: impl FnMut(&mut Transaction<'_, S>) -> Result<T, ExecutorError>,
    ) -> Result<T, ExecutorError> {
        let retries = self.config.max_tx_retries;
        match run_transaction(&self.store, retries, body) {
            Ok((value, _)) => Ok(value),
            Err(ExecutorError::Store(StoreError::Conflict(reason))) => Err(ExecutorError::RetriesExhausted {
                attempts: retries + 1,
                reason,
            }),
            Err(err) => Err(err),
        }
    }
}

/// Turn a decision into transaction writes.
fn stage<S>(
    tx: &mut Transaction<'_, S>,
    record: &ProductionEventRecord,
    decision: Decision,
    now: DateTime<Utc>,
) -> Result<Outcome, ExecutorError>
where
    S: DocumentStore + ?Sized,
{
    let writes = decision.writes.len();
    for write in decision.writes {
        match write {
            Write::PutOrder(order) => tx.put(&order)?,
            Write::PutGroup(group) => tx.put(&group)?,
            Write::PutBatch(batch) => tx.put(&batch)?,
            Write::DeleteBatch(id) => tx.delete::<ProductionBatch>(&id.to_string()),
            Write::AppendMovement(movement) => tx.create(&movement)?,
            Write::PutPosition(position) => tx.put(&position)?,
        }
    }

    let mut emitted = Vec::with_capacity(decision.emits.len());
    for event in &decision.emits {
        let next = ProductionEventRecord::new(event, Some(record.id), now)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tx.create(&next)?;
        emitted.push(next.id);
    }

    Ok(match decision.skipped {
        Some(reason) if emitted.is_empty() && writes == 0 => Outcome::Skipped { reason },
        _ => Outcome::Applied { writes, emitted },
    })
}
