//! Async facade over [`RevisionEngine`].
//!
//! Each call runs on tokio's blocking pool. Dropping the returned future does
//! not stop the blocking task, so a started write either lands whole or fails
//! whole; it is never cut off between staging and `apply`.

use std::sync::Arc;

use folio_core::{
    Caller, Commit, CommitId, Delta, Document, DocumentId, DocumentView, DraftMode, MetadataUpdate,
    RevisionError, UserId,
};
use folio_core::{DocumentPermissions, PermissionResolver};

use super::{NewDocument, RevisionEngine};
use crate::storage::DocumentStore;

pub struct AsyncRevisionEngine<S, P = DocumentPermissions> {
    engine: Arc<RevisionEngine<S, P>>,
}

impl<S, P> Clone for AsyncRevisionEngine<S, P> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S, P> AsyncRevisionEngine<S, P>
where
    S: DocumentStore + 'static,
    P: PermissionResolver + 'static,
{
    pub fn new(engine: RevisionEngine<S, P>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// The wrapped synchronous engine.
    pub fn engine(&self) -> &RevisionEngine<S, P> {
        &self.engine
    }

    async fn run<T, F>(&self, call: F) -> Result<T, RevisionError>
    where
        T: Send + 'static,
        F: FnOnce(&RevisionEngine<S, P>) -> Result<T, RevisionError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || call(&engine))
            .await
            .map_err(|e| RevisionError::Storage(format!("engine task failed: {e}")))?
    }

    pub async fn create_document(
        &self,
        owner: UserId,
        new: NewDocument,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.create_document(owner, new)).await
    }

    pub async fn get_document(
        &self,
        id: DocumentId,
        caller: Caller,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.get_document(id, caller)).await
    }

    pub async fn view_document(
        &self,
        id: DocumentId,
        caller: Caller,
    ) -> Result<DocumentView, RevisionError> {
        self.run(move |engine| engine.view_document(id, caller)).await
    }

    pub async fn list_documents(&self, caller: Caller) -> Result<Vec<Document>, RevisionError> {
        self.run(move |engine| engine.list_documents(caller)).await
    }

    pub async fn delete_document(
        &self,
        id: DocumentId,
        caller: Caller,
    ) -> Result<usize, RevisionError> {
        self.run(move |engine| engine.delete_document(id, caller)).await
    }

    pub async fn history(&self, id: DocumentId, caller: Caller) -> Result<Vec<Commit>, RevisionError> {
        self.run(move |engine| engine.history(id, caller)).await
    }

    pub async fn get_commit(
        &self,
        id: DocumentId,
        commit: CommitId,
        caller: Caller,
    ) -> Result<Commit, RevisionError> {
        self.run(move |engine| engine.get_commit(id, commit, caller)).await
    }

    pub async fn add_commit(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        message: String,
        delta: Delta,
    ) -> Result<CommitId, RevisionError> {
        self.run(move |engine| engine.add_commit(id, caller, expected_version, &message, delta))
            .await
    }

    pub async fn commit_draft(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        message: String,
    ) -> Result<CommitId, RevisionError> {
        self.run(move |engine| engine.commit_draft(id, caller, expected_version, &message))
            .await
    }

    pub async fn revert(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        target: CommitId,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.revert(id, caller, expected_version, target))
            .await
    }

    pub async fn save_draft(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        delta: Delta,
        mode: DraftMode,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.save_draft(id, caller, expected_version, delta, mode))
            .await
    }

    pub async fn clear_draft(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.clear_draft(id, caller, expected_version))
            .await
    }

    pub async fn add_collaborator(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        user: UserId,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.add_collaborator(id, caller, expected_version, user))
            .await
    }

    pub async fn remove_collaborator(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        user: UserId,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.remove_collaborator(id, caller, expected_version, user))
            .await
    }

    pub async fn set_public(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        public: bool,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.set_public(id, caller, expected_version, public))
            .await
    }

    pub async fn update_metadata(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        update: MetadataUpdate,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.update_metadata(id, caller, expected_version, update))
            .await
    }

    pub async fn star(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.star(id, caller, expected_version))
            .await
    }

    pub async fn unstar(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<Document, RevisionError> {
        self.run(move |engine| engine.unstar(id, caller, expected_version))
            .await
    }
}
