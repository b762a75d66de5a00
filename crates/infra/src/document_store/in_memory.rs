use std::collections::BTreeMap;
use std::sync::RwLock;

use super::document::{Collection, StoredDocument};
use super::query::Query;
use super::r#trait::{Commit, CommitReceipt, DocumentStore, StoreError, WriteOp};

type DocKey = (Collection, String);

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<DocKey, StoredDocument>,
    /// Last version of deleted keys; a recreated document continues from it.
    retired: BTreeMap<DocKey, u64>,
    /// Last assigned creation sequence.
    sequence: u64,
}

impl State {
    fn version(&self, collection: Collection, key: &str) -> Option<u64> {
        self.documents
            .get(&(collection, key.to_string()))
            .map(|d| d.version)
    }
}

/// In-memory document store.
///
/// Intended for tests/dev. Commits are serialized behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<State>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: Collection) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.documents.keys().filter(|(c, _)| *c == collection).count())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.documents.get(&(collection, key.to_string())).cloned())
    }

    fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;

        let mut found: Vec<StoredDocument> = state
            .documents
            .range((query.collection, String::new())..)
            .take_while(|((c, _), _)| *c == query.collection)
            .map(|(_, doc)| doc)
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect();
        found.sort_by_key(|d| d.sequence);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn commit(&self, commit: Commit) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        for read in &commit.reads {
            let current = state.version(read.collection, &read.key);
            if current != read.version {
                return Err(StoreError::Conflict(format!(
                    "{}/{} read at {:?}, now {:?}",
                    read.collection, read.key, read.version, current
                )));
            }
        }
        for write in &commit.writes {
            let current = state.version(write.collection(), write.key());
            if !write.expected().matches(current) {
                return Err(StoreError::Conflict(format!(
                    "{}/{} expected {:?}, found {:?}",
                    write.collection(),
                    write.key(),
                    write.expected(),
                    current
                )));
            }
        }

        // Validated; apply everything.
        let mut receipt = CommitReceipt::default();
        for write in commit.writes {
            match write {
                WriteOp::Put {
                    collection,
                    key,
                    body,
                    ..
                } => {
                    let slot = (collection, key.clone());
                    match state.documents.get_mut(&slot) {
                        Some(existing) => {
                            existing.version += 1;
                            existing.body = body;
                            receipt.updated += 1;
                        }
                        None => {
                            state.sequence += 1;
                            let version = state.retired.remove(&slot).unwrap_or(0) + 1;
                            let created = StoredDocument {
                                collection,
                                key,
                                version,
                                sequence: state.sequence,
                                body,
                            };
                            receipt.created.push(created.clone());
                            state.documents.insert(slot, created);
                        }
                    }
                }
                WriteOp::Delete { collection, key, .. } => {
                    let slot = (collection, key);
                    if let Some(removed) = state.documents.remove(&slot) {
                        state.retired.insert(slot, removed.version);
                        receipt.deleted += 1;
                    }
                }
            }
        }

        Ok(receipt)
    }
}
