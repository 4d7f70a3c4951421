//! In-process store over `HashMap`s.
//!
//! One `RwLock` guards both maps, so a batch's version check and all of its
//! writes happen under a single write lock.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use folio_core::{Commit, CommitId, Document, DocumentId};

use super::{CommitStore, DocumentStore, RevisionBatch, StoreError};

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<DocumentId, Document>,
    commits: HashMap<CommitId, Commit>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::DatabaseError("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::DatabaseError("memory store lock poisoned".into()))
    }
}

impl CommitStore for MemoryStore {
    fn find_commit(&self, id: CommitId) -> Result<Commit, StoreError> {
        self.read()?
            .commits
            .get(&id)
            .cloned()
            .ok_or(StoreError::CommitNotFound(id))
    }

    fn find_all_by_ids(&self, ids: &[CommitId]) -> Result<Vec<Commit>, StoreError> {
        let tables = self.read()?;
        ids.iter()
            .map(|id| {
                tables
                    .commits
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::CommitNotFound(*id))
            })
            .collect()
    }

    fn remove_many(&self, ids: &[CommitId]) -> Result<usize, StoreError> {
        let mut tables = self.write()?;
        Ok(ids
            .iter()
            .filter(|id| tables.commits.remove(*id).is_some())
            .count())
    }

    fn commit_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.commits.len())
    }
}

impl DocumentStore for MemoryStore {
    fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.documents.contains_key(&document.id()) {
            return Err(StoreError::AlreadyExists(document.id()));
        }
        tables.documents.insert(document.id(), document.clone());
        Ok(())
    }

    fn load_document(&self, id: DocumentId) -> Result<Document, StoreError> {
        self.read()?
            .documents
            .get(&id)
            .cloned()
            .ok_or(StoreError::DocumentNotFound(id))
    }

    fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut documents: Vec<Document> = self.read()?.documents.values().cloned().collect();
        documents.sort_by_key(|doc| (doc.created(), doc.id()));
        Ok(documents)
    }

    fn delete_document(&self, id: DocumentId) -> Result<usize, StoreError> {
        let mut tables = self.write()?;
        if tables.documents.remove(&id).is_none() {
            return Err(StoreError::DocumentNotFound(id));
        }
        let before = tables.commits.len();
        tables.commits.retain(|_, commit| commit.document() != id);
        Ok(before - tables.commits.len())
    }

    fn apply(&self, batch: RevisionBatch) -> Result<(), StoreError> {
        let document = batch.validate()?;
        let mut tables = self.write()?;

        let stored = tables
            .documents
            .get(&batch.document_id())
            .ok_or(StoreError::DocumentNotFound(batch.document_id()))?;
        if stored.version() != batch.expected_version() {
            return Err(StoreError::VersionConflict {
                expected: batch.expected_version(),
                actual: stored.version(),
            });
        }
        for id in batch.removed() {
            match tables.commits.get(id) {
                Some(commit) if commit.document() == batch.document_id() => {}
                Some(commit) => {
                    return Err(StoreError::InvalidBatch(format!(
                        "commit {id} belongs to document {}",
                        commit.document()
                    )))
                }
                None => return Err(StoreError::CommitNotFound(*id)),
            }
        }

        // Every check passed; nothing below can fail.
        for id in batch.removed() {
            tables.commits.remove(id);
        }
        for commit in batch.created() {
            tables.commits.insert(commit.id(), commit.clone());
        }
        tables.documents.insert(batch.document_id(), document.clone());
        Ok(())
    }
}
