//! Infrastructure layer: document store, transactions, workflow execution,
//! trigger delivery, configuration.

pub mod config;
pub mod document_store;
pub mod reader;
pub mod transaction;
pub mod trigger;
pub mod workflow_executor;

pub use config::EngineConfig;
pub use document_store::{
    Collection, Document, DocumentStore, EventTrigger, Filter, InMemoryDocumentStore,
    PublishingDocumentStore, Query, StoreError,
};
pub use transaction::{Transaction, run_transaction};
pub use trigger::{DrainReport, TriggerWorker, WorkerHandle, drain};
pub use workflow_executor::{ExecutorError, Outcome, WorkflowExecutor};
