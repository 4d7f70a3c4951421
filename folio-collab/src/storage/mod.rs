//! Persistent storage for documents and their commits.
//!
//! Architecture:
//! ```text
//! ┌────────────────┐  RevisionBatch   ┌──────────────────┐
//! │ RevisionEngine │ ───────────────► │ DocumentStore    │
//! │                │  (one atomic     │  + CommitStore   │
//! └────────────────┘   apply)         └────────┬─────────┘
//!                                              │
//!                          ┌───────────────────┴──────────────────┐
//!                          ▼                                      ▼
//!                   ┌─────────────┐              ┌──────────────────────────────┐
//!                   │ MemoryStore │              │ RocksDocumentStore           │
//!                   │ (HashMaps)  │              │ CF "documents"    snapshots  │
//!                   └─────────────┘              │ CF "commits"      doc:commit │
//!                                                │ CF "commit_index" commit→doc │
//!                                                │ CF "metadata"     versions   │
//!                                                └──────────────────────────────┘
//! ```
//!
//! A [`RevisionBatch`] carries everything one engine operation writes: new
//! commits, removed commits and the new document state. Backends apply it
//! all-or-nothing, and only if the stored document version still equals the
//! batch's expected version.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{DocumentMetadata, RocksDocumentStore, StoreConfig};

use folio_core::{Commit, CommitId, Delta, Document, DocumentId, RevisionError};

/// Storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Document not found
    DocumentNotFound(DocumentId),
    /// Commit not found
    CommitNotFound(CommitId),
    /// A document with this id is already stored
    AlreadyExists(DocumentId),
    /// Stored version moved since the batch was staged
    VersionConflict { expected: u64, actual: u64 },
    /// Batch is inconsistent with the stored state
    InvalidBatch(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::DocumentNotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::CommitNotFound(id) => write!(f, "Commit not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "Document already exists: {id}"),
            StoreError::VersionConflict { expected, actual } => {
                write!(f, "Version conflict: expected {expected}, stored {actual}")
            }
            StoreError::InvalidBatch(e) => write!(f, "Invalid batch: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for RevisionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DocumentNotFound(_) | StoreError::CommitNotFound(_) => {
                RevisionError::NotFound(e.to_string())
            }
            StoreError::VersionConflict { expected, actual } => {
                RevisionError::Conflict { expected, actual }
            }
            StoreError::AlreadyExists(_) => RevisionError::Validation(e.to_string()),
            _ => RevisionError::Storage(e.to_string()),
        }
    }
}

/// Staged writes for one document, applied atomically by a [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct RevisionBatch {
    document_id: DocumentId,
    expected_version: u64,
    created: Vec<Commit>,
    removed: Vec<CommitId>,
    document: Option<Document>,
}

impl RevisionBatch {
    /// Start a batch against the snapshot the caller loaded.
    pub fn new(snapshot: &Document) -> Self {
        Self {
            document_id: snapshot.id(),
            expected_version: snapshot.version(),
            created: Vec::new(),
            removed: Vec::new(),
            document: None,
        }
    }

    /// Build a commit for this batch's document and stage it.
    ///
    /// Fails with `Validation` on an empty message or empty delta; nothing is
    /// staged in that case.
    pub fn create(
        &mut self,
        message: &str,
        ops: Delta,
        now: u64,
    ) -> Result<Commit, RevisionError> {
        let commit = Commit::new(self.document_id, message, ops, now)?;
        self.created.push(commit.clone());
        Ok(commit)
    }

    /// Stage permanent removal of commits.
    pub fn remove_many(&mut self, ids: &[CommitId]) {
        self.removed.extend_from_slice(ids);
    }

    /// Stage the new document state written with the commits.
    pub fn put_document(&mut self, document: Document) {
        self.document = Some(document);
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    pub fn expected_version(&self) -> u64 {
        self.expected_version
    }

    pub fn created(&self) -> &[Commit] {
        &self.created
    }

    pub fn removed(&self) -> &[CommitId] {
        &self.removed
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// Consistency checks every backend runs before writing.
    pub(crate) fn validate(&self) -> Result<&Document, StoreError> {
        let document = self
            .document
            .as_ref()
            .ok_or_else(|| StoreError::InvalidBatch("no document state staged".into()))?;
        if document.id() != self.document_id {
            return Err(StoreError::InvalidBatch(format!(
                "staged document {} does not match batch document {}",
                document.id(),
                self.document_id
            )));
        }
        if let Some(commit) = self.created.iter().find(|c| c.document() != self.document_id) {
            return Err(StoreError::InvalidBatch(format!(
                "commit {} belongs to document {}",
                commit.id(),
                commit.document()
            )));
        }
        Ok(document)
    }
}

/// Commit records, looked up by id.
pub trait CommitStore: Send + Sync {
    fn find_commit(&self, id: CommitId) -> Result<Commit, StoreError>;

    /// Commits in the order of `ids`; fails if any id is missing.
    fn find_all_by_ids(&self, ids: &[CommitId]) -> Result<Vec<Commit>, StoreError> {
        ids.iter().map(|id| self.find_commit(*id)).collect()
    }

    /// Permanently delete the given commits. Unknown ids are skipped.
    ///
    /// Returns the number of commits removed.
    fn remove_many(&self, ids: &[CommitId]) -> Result<usize, StoreError>;

    /// Total number of commits stored.
    fn commit_count(&self) -> Result<usize, StoreError>;
}

/// Documents plus the atomic batch write that keeps them in step with their
/// commits.
pub trait DocumentStore: CommitStore {
    fn insert_document(&self, document: &Document) -> Result<(), StoreError>;

    fn load_document(&self, id: DocumentId) -> Result<Document, StoreError>;

    /// All documents, oldest first.
    fn list_documents(&self) -> Result<Vec<Document>, StoreError>;

    /// Delete a document and every commit that references it.
    ///
    /// Returns the number of commits removed.
    fn delete_document(&self, id: DocumentId) -> Result<usize, StoreError>;

    /// Apply a staged batch, or nothing at all.
    fn apply(&self, batch: RevisionBatch) -> Result<(), StoreError>;
}
