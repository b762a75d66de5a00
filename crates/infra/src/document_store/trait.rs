use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use fabline_core::ExpectedVersion;

use super::document::{Collection, StoredDocument};
use super::query::Query;

/// Document store operation error.
///
/// These are **infrastructure errors** (concurrency, transaction discipline,
/// encoding) as opposed to workflow errors (validation, missing entities).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A read or expected version no longer matches at commit time.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// A transaction tried to read after it had started writing.
    #[error("read after write in transaction: {0}")]
    ReadAfterWrite(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("{collection} document {key} not found")]
    NotFound { collection: Collection, key: String },

    /// Trigger publication failed after a successful commit.
    #[error("trigger publication failed: {0}")]
    Publish(String),
}

/// Version of a document observed by a transaction; `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    pub collection: Collection,
    pub key: String,
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        collection: Collection,
        key: String,
        body: JsonValue,
        expected: ExpectedVersion,
    },
    Delete {
        collection: Collection,
        key: String,
        expected: ExpectedVersion,
    },
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Put { collection, .. } | WriteOp::Delete { collection, .. } => *collection,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key,
        }
    }

    pub fn expected(&self) -> ExpectedVersion {
        match self {
            WriteOp::Put { expected, .. } | WriteOp::Delete { expected, .. } => *expected,
        }
    }
}

/// A read set to validate and the writes to apply if it still holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commit {
    pub reads: Vec<ReadRecord>,
    pub writes: Vec<WriteOp>,
}

/// What a successful commit changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    /// Documents that did not exist before this commit.
    pub created: Vec<StoredDocument>,
    pub updated: usize,
    pub deleted: usize,
}

/// Transactional JSON document store.
///
/// ## Commit semantics
///
/// `commit()` is all-or-nothing:
/// - every recorded read must still be at the version it was read at
///   (absent documents must still be absent)
/// - every write's `ExpectedVersion` must match the current version
/// - otherwise nothing is written and [`StoreError::Conflict`] is returned,
///   so the caller can re-run its whole transaction body
///
/// Reads outside a commit are plain snapshot reads of single documents or
/// query results; recording them is the caller's job (see
/// [`crate::transaction::Transaction`]).
pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Matching documents in creation order.
    fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    fn commit(&self, commit: Commit) -> Result<CommitReceipt, StoreError>;
}

impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        (**self).get(collection, key)
    }

    fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        (**self).query(query)
    }

    fn commit(&self, commit: Commit) -> Result<CommitReceipt, StoreError> {
        (**self).commit(commit)
    }
}
