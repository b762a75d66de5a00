//! Read-then-write transactions with optimistic retry.
//!
//! A [`Transaction`] records the version of every document it reads and
//! buffers its writes; the commit re-validates the whole read set. Reading
//! after the first write is refused, so every body has the shape
//! "load everything, then write".

use std::collections::HashMap;

use tracing::{debug, warn};

use fabline_core::ExpectedVersion;

use crate::document_store::{
    Collection, Commit, CommitReceipt, Document, DocumentStore, Query, ReadRecord, StoreError,
    WriteOp, encode,
};

pub struct Transaction<'s, S: ?Sized> {
    store: &'s S,
    reads: HashMap<(Collection, String), Option<u64>>,
    read_order: Vec<(Collection, String)>,
    writes: Vec<WriteOp>,
}

impl<'s, S> Transaction<'s, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            read_order: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn get<D: Document>(&mut self, key: &str) -> Result<Option<D>, StoreError> {
        self.ensure_reading(D::COLLECTION, key)?;
        let stored = self.store.get(D::COLLECTION, key)?;
        self.record(D::COLLECTION, key, stored.as_ref().map(|d| d.version));
        stored.map(|d| d.decode()).transpose()
    }

    /// Fetch a document that must exist.
    pub fn require<D: Document>(&mut self, key: &str) -> Result<D, StoreError> {
        self.get(key)?.ok_or_else(|| StoreError::NotFound {
            collection: D::COLLECTION,
            key: key.to_string(),
        })
    }

    /// Run a query over `D`'s collection, recording every returned document.
    pub fn query<D: Document>(&mut self, query: Query) -> Result<Vec<D>, StoreError> {
        let query = Query {
            collection: D::COLLECTION,
            ..query
        };
        self.ensure_reading(D::COLLECTION, "<query>")?;
        let found = self.store.query(&query)?;
        found
            .iter()
            .map(|doc| {
                self.record(doc.collection, &doc.key, Some(doc.version));
                doc.decode()
            })
            .collect()
    }

    /// Create or replace a document.
    ///
    /// The write is conditioned on the version this transaction read, if any.
    pub fn put<D: Document>(&mut self, document: &D) -> Result<(), StoreError> {
        let key = document.key();
        let expected = self.expected_for(D::COLLECTION, &key);
        self.push(WriteOp::Put {
            collection: D::COLLECTION,
            key,
            body: encode(document)?,
            expected,
        });
        Ok(())
    }

    /// Create a document that must not exist yet.
    pub fn create<D: Document>(&mut self, document: &D) -> Result<(), StoreError> {
        self.push(WriteOp::Put {
            collection: D::COLLECTION,
            key: document.key(),
            body: encode(document)?,
            expected: ExpectedVersion::Absent,
        });
        Ok(())
    }

    pub fn delete<D: Document>(&mut self, key: &str) {
        let expected = self.expected_for(D::COLLECTION, key);
        self.push(WriteOp::Delete {
            collection: D::COLLECTION,
            key: key.to_string(),
            expected,
        });
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    pub fn into_commit(self) -> Commit {
        let reads = self
            .read_order
            .into_iter()
            .map(|slot| {
                let version = self.reads.get(&slot).copied().flatten();
                ReadRecord {
                    collection: slot.0,
                    key: slot.1,
                    version,
                }
            })
            .collect();
        Commit {
            reads,
            writes: self.writes,
        }
    }

    fn ensure_reading(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ReadAfterWrite(format!("{collection}/{key}")))
        }
    }

    /// First observed version wins; a later different one fails the commit.
    fn record(&mut self, collection: Collection, key: &str, version: Option<u64>) {
        let slot = (collection, key.to_string());
        if !self.reads.contains_key(&slot) {
            self.reads.insert(slot.clone(), version);
            self.read_order.push(slot);
        }
    }

    fn expected_for(&self, collection: Collection, key: &str) -> ExpectedVersion {
        match self.reads.get(&(collection, key.to_string())) {
            Some(Some(version)) => ExpectedVersion::Exact(*version),
            Some(None) => ExpectedVersion::Absent,
            None => ExpectedVersion::Any,
        }
    }

    /// Later writes to the same document replace earlier ones.
    fn push(&mut self, write: WriteOp) {
        let existing = self
            .writes
            .iter()
            .position(|w| w.collection() == write.collection() && w.key() == write.key());
        match existing {
            Some(index) => self.writes[index] = write,
            None => self.writes.push(write),
        }
    }
}

/// Run `body` in a fresh transaction and commit it, retrying the whole body on
/// optimistic-concurrency conflicts up to `max_retries` times.
///
/// The body must have no effects outside the transaction. Errors from the body
/// abort immediately without committing anything.
pub fn run_transaction<S, T, E, F>(
    store: &S,
    max_retries: u32,
    mut body: F,
) -> Result<(T, CommitReceipt), E>
where
    S: DocumentStore + ?Sized,
    E: From<StoreError>,
    F: FnMut(&mut Transaction<'_, S>) -> Result<T, E>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut tx = Transaction::new(store);
        let value = body(&mut tx)?;

        match store.commit(tx.into_commit()) {
            Ok(receipt) => return Ok((value, receipt)),
            Err(StoreError::Conflict(reason)) if attempt <= max_retries => {
                warn!(attempt, %reason, "transaction conflict; retrying");
            }
            Err(err) => {
                debug!(attempt, error = %err, "transaction failed");
                return Err(err.into());
            }
        }
    }
}
