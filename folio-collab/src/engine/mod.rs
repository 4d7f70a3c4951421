//! Revision engine: the only writer of documents and commits.
//!
//! Every mutating call follows the same path:
//!
//! ```text
//!  load ─► resolve tier ─► check expected_version ─► validate/compose
//!                                                          │
//!                    store.apply(RevisionBatch) ◄──────────┘
//!                    (atomic, re-checks version)
//! ```
//!
//! Nothing is written before `apply`, so any error before it leaves the
//! store untouched, and `apply` itself is all-or-nothing.

pub mod handle;

pub use handle::AsyncRevisionEngine;

use std::sync::Arc;
use std::time::SystemTime;

use folio_core::{
    compose_onto, replay, Caller, Commit, CommitId, Delta, Document, DocumentId, DocumentPermissions,
    DocumentView, DraftMode, MetadataUpdate, PermissionResolver, PermissionTier, RevisionError,
    RevisionState, UserId,
};

use crate::storage::{CommitStore, DocumentStore, RevisionBatch};

/// Source of timestamps (milliseconds since the Unix epoch).
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Engine limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest accepted document name, in characters
    pub max_name_len: usize,
    /// Longest accepted document description, in characters
    pub max_description_len: usize,
    /// Longest accepted commit message, in characters
    pub max_message_len: usize,
    /// Most operations accepted in one submitted delta
    pub max_delta_ops: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_name_len: 80,
            max_description_len: 200,
            max_message_len: 4096,
            max_delta_ops: 100_000,
        }
    }
}

impl EngineConfig {
    /// Small limits so tests can hit them cheaply.
    pub fn for_testing() -> Self {
        Self {
            max_name_len: 32,
            max_description_len: 40,
            max_message_len: 64,
            max_delta_ops: 16,
        }
    }
}

/// Fields accepted when creating a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub public: bool,
    pub adult_content: bool,
    pub allow_comments: bool,
    pub collaborators: Vec<UserId>,
}

impl Default for NewDocument {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            tags: Vec::new(),
            public: false,
            adult_content: false,
            allow_comments: true,
            collaborators: Vec::new(),
        }
    }
}

impl NewDocument {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

pub struct RevisionEngine<S, P = DocumentPermissions> {
    store: Arc<S>,
    resolver: P,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> RevisionEngine<S, DocumentPermissions> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self::with_resolver(store, DocumentPermissions, config)
    }
}

impl<S: DocumentStore, P: PermissionResolver> RevisionEngine<S, P> {
    pub fn with_resolver(store: Arc<S>, resolver: P, config: EngineConfig) -> Self {
        Self {
            store,
            resolver,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─── Documents ────────────────────────────────────────────────────

    pub fn create_document(
        &self,
        owner: UserId,
        new: NewDocument,
    ) -> Result<Document, RevisionError> {
        let metadata = self.check_metadata(MetadataUpdate {
            name: Some(new.name),
            description: Some(new.description),
            tags: Some(new.tags),
            adult_content: Some(new.adult_content),
            allow_comments: Some(new.allow_comments),
        })?;
        let name = metadata.name.clone().unwrap_or_default();

        let document = Document::new(name, owner, self.clock.now_millis())
            .with_metadata(metadata)
            .shared_with(new.collaborators, new.public);
        self.store.insert_document(&document)?;
        log::info!("Created document {} for {owner}", document.id());
        Ok(document)
    }

    pub fn get_document(&self, id: DocumentId, caller: Caller) -> Result<Document, RevisionError> {
        let (document, _) = self.load_readable(id, caller)?;
        Ok(document)
    }

    /// The reader's view: stars collapse to a count and `is_starred`.
    pub fn view_document(&self, id: DocumentId, caller: Caller) -> Result<DocumentView, RevisionError> {
        Ok(self.get_document(id, caller)?.into_view(caller))
    }

    /// Documents the caller owns, collaborates on, or that are public.
    pub fn list_documents(&self, caller: Caller) -> Result<Vec<Document>, RevisionError> {
        Ok(self
            .store
            .list_documents()?
            .into_iter()
            .filter(|doc| self.resolver.resolve(doc, caller).can_read())
            .collect())
    }

    /// Delete a document and every commit that references it.
    pub fn delete_document(&self, id: DocumentId, caller: Caller) -> Result<usize, RevisionError> {
        let document = self.store.load_document(id)?;
        self.require_owner(&document, caller)?;
        let removed = self.store.delete_document(id)?;
        log::info!("Deleted document {id} ({removed} commits)");
        Ok(removed)
    }

    // ─── History ──────────────────────────────────────────────────────

    /// Commits in history order.
    pub fn history(&self, id: DocumentId, caller: Caller) -> Result<Vec<Commit>, RevisionError> {
        let (document, _) = self.load_readable(id, caller)?;
        Ok(self.store.find_all_by_ids(document.history())?)
    }

    pub fn get_commit(
        &self,
        id: DocumentId,
        commit: CommitId,
        caller: Caller,
    ) -> Result<Commit, RevisionError> {
        self.load_readable(id, caller)?;
        let found = self.store.find_commit(commit)?;
        if found.document() != id {
            return Err(RevisionError::NotFound(format!(
                "commit {commit} does not belong to document {id}"
            )));
        }
        Ok(found)
    }

    /// Append `delta` as a new commit and recompute the current state.
    pub fn add_commit(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        message: &str,
        delta: Delta,
    ) -> Result<CommitId, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        let now = self.clock.now_millis();

        let mut batch = RevisionBatch::new(&document);
        let (commit, composed) = self.stage_commit(&document, &mut batch, message, delta, now)?;
        document.append_commit(&commit, composed, now)?;
        let version = document.version();
        batch.put_document(document);
        self.apply(batch)?;

        log::info!("Committed {} to document {id} (version {version})", commit.id());
        Ok(commit.id())
    }

    /// Commit the draft and clear it, in one write.
    pub fn commit_draft(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        message: &str,
    ) -> Result<CommitId, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        if !document.has_draft() {
            return Err(RevisionError::Validation("draft is empty".into()));
        }
        let now = self.clock.now_millis();
        let ops = document.draft().ops.clone();

        let mut batch = RevisionBatch::new(&document);
        let (commit, composed) = self.stage_commit(&document, &mut batch, message, ops, now)?;
        document.commit_draft(&commit, composed, now)?;
        batch.put_document(document);
        self.apply(batch)?;

        log::info!("Committed draft of document {id} as {}", commit.id());
        Ok(commit.id())
    }

    /// Truncate history after `target` and rebuild the current state from
    /// the surviving commits.
    pub fn revert(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        target: CommitId,
    ) -> Result<Document, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        let surviving = document.split_history(target)?.0.to_vec();
        let composed = replay(&self.store.find_all_by_ids(&surviving)?)?;

        let mut batch = RevisionBatch::new(&document);
        let removed = document.revert_to(target, composed, self.clock.now_millis())?;
        batch.remove_many(&removed);
        batch.put_document(document.clone());
        self.apply(batch)?;

        log::info!(
            "Reverted document {id} to {target}, removed {} commits",
            removed.len()
        );
        Ok(document)
    }

    // ─── Draft ────────────────────────────────────────────────────────

    pub fn save_draft(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        delta: Delta,
        mode: DraftMode,
    ) -> Result<Document, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        self.check_delta_size(&delta)?;
        let batch = RevisionBatch::new(&document);
        document.save_draft(delta, mode, self.clock.now_millis());
        self.write_document(batch, document)
    }

    pub fn clear_draft(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<Document, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        let batch = RevisionBatch::new(&document);
        document.clear_draft(self.clock.now_millis());
        self.write_document(batch, document)
    }

    // ─── Sharing ──────────────────────────────────────────────────────

    pub fn add_collaborator(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        user: UserId,
    ) -> Result<Document, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        let batch = RevisionBatch::new(&document);
        if document.add_collaborator(user, self.clock.now_millis()) {
            return self.write_document(batch, document);
        }
        Ok(document)
    }

    pub fn remove_collaborator(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        user: UserId,
    ) -> Result<Document, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        let batch = RevisionBatch::new(&document);
        if document.remove_collaborator(user, self.clock.now_millis()) {
            return self.write_document(batch, document);
        }
        Ok(document)
    }

    pub fn set_public(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        public: bool,
    ) -> Result<Document, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        let batch = RevisionBatch::new(&document);
        if document.set_public(public, self.clock.now_millis()) {
            return self.write_document(batch, document);
        }
        Ok(document)
    }

    /// Change name, description, tags or content flags. Owner only.
    pub fn update_metadata(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
        update: MetadataUpdate,
    ) -> Result<Document, RevisionError> {
        let mut document = self.load_writable(id, caller, expected_version)?;
        let update = self.check_metadata(update)?;
        let batch = RevisionBatch::new(&document);
        if document.update_metadata(update, self.clock.now_millis()) {
            return self.write_document(batch, document);
        }
        Ok(document)
    }

    // ─── Stars ────────────────────────────────────────────────────────

    /// Star a document the caller can read.
    pub fn star(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<Document, RevisionError> {
        let (mut document, user) = self.load_starrable(id, caller, expected_version)?;
        let batch = RevisionBatch::new(&document);
        if document.star(user, self.clock.now_millis()) {
            return self.write_document(batch, document);
        }
        Ok(document)
    }

    pub fn unstar(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<Document, RevisionError> {
        let (mut document, user) = self.load_starrable(id, caller, expected_version)?;
        let batch = RevisionBatch::new(&document);
        if document.unstar(user, self.clock.now_millis()) {
            return self.write_document(batch, document);
        }
        Ok(document)
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn load_readable(
        &self,
        id: DocumentId,
        caller: Caller,
    ) -> Result<(Document, PermissionTier), RevisionError> {
        let document = self.store.load_document(id)?;
        let tier = self.resolver.resolve(&document, caller);
        if !tier.can_read() {
            return Err(RevisionError::Permission {
                required: PermissionTier::Public,
                actual: tier,
            });
        }
        Ok((document, tier))
    }

    fn load_writable(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<Document, RevisionError> {
        let document = self.store.load_document(id)?;
        self.require_owner(&document, caller)?;
        document.ensure_version(expected_version)?;
        Ok(document)
    }

    /// Stars need a signed-in reader.
    fn load_starrable(
        &self,
        id: DocumentId,
        caller: Caller,
        expected_version: u64,
    ) -> Result<(Document, UserId), RevisionError> {
        let (document, _) = self.load_readable(id, caller)?;
        let user = caller.user().ok_or(RevisionError::Permission {
            required: PermissionTier::Public,
            actual: PermissionTier::None,
        })?;
        document.ensure_version(expected_version)?;
        Ok((document, user))
    }

    fn require_owner(&self, document: &Document, caller: Caller) -> Result<(), RevisionError> {
        let tier = self.resolver.resolve(document, caller);
        if !tier.can_write() {
            log::warn!("Rejected write to {} by {caller:?} ({tier:?})", document.id());
            return Err(RevisionError::Permission {
                required: PermissionTier::Owner,
                actual: tier,
            });
        }
        Ok(())
    }

    /// Trim and bound the descriptive fields; tags are trimmed, must be
    /// non-empty and keep their first occurrence only.
    fn check_metadata(&self, mut update: MetadataUpdate) -> Result<MetadataUpdate, RevisionError> {
        if let Some(name) = update.name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                return Err(RevisionError::Validation("document name is required".into()));
            }
            if name.chars().count() > self.config.max_name_len {
                return Err(RevisionError::Validation(format!(
                    "document name exceeds {} characters",
                    self.config.max_name_len
                )));
            }
        }
        if let Some(description) = update.description.as_ref() {
            if description.chars().count() > self.config.max_description_len {
                return Err(RevisionError::Validation(format!(
                    "description exceeds {} characters",
                    self.config.max_description_len
                )));
            }
        }
        if let Some(tags) = update.tags.take() {
            let mut kept: Vec<String> = Vec::with_capacity(tags.len());
            for tag in tags {
                let tag = tag.trim();
                if tag.is_empty() {
                    return Err(RevisionError::Validation("tags must not be empty".into()));
                }
                if !kept.iter().any(|t| t == tag) {
                    kept.push(tag.to_string());
                }
            }
            update.tags = Some(kept);
        }
        Ok(update)
    }

    fn check_delta_size(&self, delta: &Delta) -> Result<(), RevisionError> {
        if delta.ops().len() > self.config.max_delta_ops {
            return Err(RevisionError::Validation(format!(
                "delta has {} operations, limit is {}",
                delta.ops().len(),
                self.config.max_delta_ops
            )));
        }
        Ok(())
    }

    /// Stage a commit for `delta` and compute the composed state after it.
    fn stage_commit(
        &self,
        document: &Document,
        batch: &mut RevisionBatch,
        message: &str,
        delta: Delta,
        now: u64,
    ) -> Result<(Commit, Delta), RevisionError> {
        if message.chars().count() > self.config.max_message_len {
            return Err(RevisionError::Validation(format!(
                "commit message exceeds {} characters",
                self.config.max_message_len
            )));
        }
        self.check_delta_size(&delta)?;

        let commit = batch.create(message, delta, now)?;
        let composed = match document.state() {
            RevisionState::Empty => commit.ops().clone(),
            RevisionState::Committed => compose_onto(&document.content(), commit.ops())?,
        };
        Ok((commit, composed))
    }

    fn write_document(
        &self,
        mut batch: RevisionBatch,
        document: Document,
    ) -> Result<Document, RevisionError> {
        batch.put_document(document.clone());
        self.apply(batch)?;
        log::debug!("Wrote document {} (version {})", document.id(), document.version());
        Ok(document)
    }

    fn apply(&self, batch: RevisionBatch) -> Result<(), RevisionError> {
        let id = batch.document_id();
        self.store.apply(batch).map_err(|e| {
            let err = RevisionError::from(e);
            if let RevisionError::Conflict { expected, actual } = &err {
                log::warn!("Version conflict on {id}: expected {expected}, stored {actual}");
            }
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use folio_core::ErrorKind;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock advanced by hand.
    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn set(&self, now: u64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        engine: RevisionEngine<MemoryStore>,
        clock: Arc<ManualClock>,
        owner: UserId,
        doc: DocumentId,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::default());
            let engine = RevisionEngine::new(Arc::new(MemoryStore::new()), EngineConfig::for_testing())
                .with_clock(clock.clone());
            let owner = UserId::new();
            let doc = engine
                .create_document(owner, NewDocument::named("Notes"))
                .unwrap()
                .id();
            Self {
                engine,
                clock,
                owner,
                doc,
            }
        }

        fn owner(&self) -> Caller {
            Caller::User(self.owner)
        }

        fn load(&self) -> Document {
            self.engine.get_document(self.doc, self.owner()).unwrap()
        }

        fn commit(&self, message: &str, delta: Delta) -> Result<CommitId, RevisionError> {
            let version = self.load().version();
            self.engine
                .add_commit(self.doc, self.owner(), version, message, delta)
        }

        fn commit_count(&self) -> usize {
            self.engine.store().commit_count().unwrap()
        }

        fn assert_replay_matches(&self) {
            let doc = self.load();
            let commits = self.engine.store().find_all_by_ids(doc.history()).unwrap();
            assert_eq!(doc.content(), replay(&commits).unwrap());
        }
    }

    #[test]
    fn test_hi_there_world_scenario() {
        let f = Fixture::new();
        let owner = f.owner();

        let c1 = f
            .engine
            .add_commit(f.doc, owner, 0, "init", Delta::new().insert("Hi"))
            .unwrap();
        let doc = f.load();
        assert_eq!(doc.history(), &[c1]);
        assert_eq!(doc.content(), Delta::new().insert("Hi"));

        let c2 = f
            .engine
            .add_commit(f.doc, owner, 1, "more", Delta::new().retain(2).insert(" there"))
            .unwrap();
        let doc = f.load();
        assert_eq!(doc.history(), &[c1, c2]);
        assert_eq!(doc.content(), Delta::new().insert("Hi there"));

        let reverted = f.engine.revert(f.doc, owner, 2, c1).unwrap();
        assert_eq!(reverted.history(), &[c1]);
        assert_eq!(reverted.content(), Delta::new().insert("Hi"));
        assert_eq!(reverted.current().commit, Some(c1));
        assert!(f.engine.store().find_commit(c2).is_err());

        let c3 = f
            .engine
            .add_commit(f.doc, owner, 3, "again", Delta::new().retain(2).insert(" world"))
            .unwrap();
        let doc = f.load();
        assert_eq!(doc.history(), &[c1, c3]);
        assert_eq!(doc.content(), Delta::new().insert("Hi world"));
        assert_eq!(doc.version(), 4);
        f.assert_replay_matches();
    }

    #[test]
    fn test_composed_matches_replay_after_each_commit() {
        let f = Fixture::new();
        let mut bold = folio_core::Attributes::new();
        bold.insert("bold".into(), serde_json::json!(true));

        let edits = vec![
            Delta::new().insert("Hello world"),
            Delta::new().retain(6).delete(5).insert("there"),
            Delta::new().retain_with(5, bold),
            Delta::new().retain(11).insert("!"),
            Delta::new().delete(6),
        ];
        for (i, edit) in edits.into_iter().enumerate() {
            f.commit(&format!("edit {i}"), edit).unwrap();
            f.assert_replay_matches();
        }
        assert_eq!(f.load().content().to_plain_text(), "there!");
    }

    #[test]
    fn test_revert_cardinalities() {
        let f = Fixture::new();
        let mut ids = vec![f.commit("c1", Delta::new().insert("a")).unwrap()];
        for (i, text) in ["b", "c", "d", "e"].iter().enumerate() {
            ids.push(f.commit("next", Delta::new().retain(i as u64 + 1).insert(*text)).unwrap());
        }
        assert_eq!(f.commit_count(), 5);

        // Revert to the 2nd of 5 commits.
        let version = f.load().version();
        let doc = f.engine.revert(f.doc, f.owner(), version, ids[1]).unwrap();
        assert_eq!(doc.history(), &ids[..2]);
        assert_eq!(doc.content(), Delta::new().insert("ab"));
        assert_eq!(f.commit_count(), 2);
        f.assert_replay_matches();

        // Reverting to the head removes nothing.
        let doc = f.engine.revert(f.doc, f.owner(), doc.version(), ids[1]).unwrap();
        assert_eq!(doc.history().len(), 2);
        assert_eq!(f.commit_count(), 2);
    }

    #[test]
    fn test_revert_unknown_commit_changes_nothing() {
        let f = Fixture::new();
        f.commit("init", Delta::new().insert("Hi")).unwrap();
        let before = f.load();

        let err = f
            .engine
            .revert(f.doc, f.owner(), before.version(), CommitId::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.load(), before);
        assert_eq!(f.commit_count(), 1);
    }

    #[test]
    fn test_revert_to_commit_of_other_document() {
        let f = Fixture::new();
        f.commit("init", Delta::new().insert("Hi")).unwrap();
        let other = f
            .engine
            .create_document(f.owner, NewDocument::named("Other"))
            .unwrap();
        let foreign = f
            .engine
            .add_commit(other.id(), f.owner(), 0, "init", Delta::new().insert("x"))
            .unwrap();

        let err = f.engine.revert(f.doc, f.owner(), 1, foreign).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.commit_count(), 2);
    }

    #[test]
    fn test_non_owner_cannot_commit() {
        let f = Fixture::new();
        let collaborator = UserId::new();
        let doc = f
            .engine
            .add_collaborator(f.doc, f.owner(), 0, collaborator)
            .unwrap();
        assert_eq!(doc.version(), 1);

        for caller in [Caller::User(collaborator), Caller::User(UserId::new()), Caller::Anonymous] {
            let err = f
                .engine
                .add_commit(f.doc, caller, 1, "sneaky", Delta::new().insert("x"))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Permission);
            assert_eq!(err.status_code(), 401);
        }
        assert_eq!(f.commit_count(), 0);
        assert_eq!(f.load().version(), 1);
    }

    #[test]
    fn test_read_permissions() {
        let f = Fixture::new();
        let collaborator = UserId::new();
        let stranger = Caller::User(UserId::new());
        f.engine.add_collaborator(f.doc, f.owner(), 0, collaborator).unwrap();
        let c1 = f.commit("init", Delta::new().insert("Hi")).unwrap();

        assert!(f.engine.get_document(f.doc, collaborator.into()).is_ok());
        assert!(f.engine.history(f.doc, collaborator.into()).is_ok());
        assert_eq!(
            f.engine.get_document(f.doc, stranger).unwrap_err().kind(),
            ErrorKind::Permission
        );
        assert!(f.engine.get_commit(f.doc, c1, stranger).is_err());

        let version = f.load().version();
        f.engine.set_public(f.doc, f.owner(), version, true).unwrap();
        assert!(f.engine.get_document(f.doc, stranger).is_ok());
        assert_eq!(f.engine.get_commit(f.doc, c1, Caller::Anonymous).unwrap().id(), c1);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let f = Fixture::new();
        f.commit("init", Delta::new().insert("Hi")).unwrap();

        let err = f
            .engine
            .add_commit(f.doc, f.owner(), 0, "stale", Delta::new().retain(2).insert("!"))
            .unwrap_err();
        assert_eq!(err, RevisionError::Conflict { expected: 0, actual: 1 });
        assert_eq!(err.status_code(), 409);
        assert_eq!(f.commit_count(), 1);

        let err = f
            .engine
            .save_draft(f.doc, f.owner(), 0, Delta::new().insert("x"), DraftMode::Replace)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_first_commit_is_taken_as_is() {
        let f = Fixture::new();
        let first = Delta::new().retain(3).insert("x");
        f.commit("open", first.clone()).unwrap();
        let doc = f.load();
        assert_eq!(doc.content(), first);
        assert_eq!(doc.version(), 1);
        f.assert_replay_matches();
    }

    #[test]
    fn test_emptied_document_still_rejects_stale_clients() {
        let f = Fixture::new();
        f.commit("init", Delta::new().insert("a")).unwrap();
        f.commit("clear", Delta::new().delete(1)).unwrap();
        let before = f.load();
        assert_eq!(before.state(), RevisionState::Committed);
        assert!(before.content().is_empty());

        let err = f
            .commit("stale", Delta::new().retain(5).delete(3).insert("x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compose);
        assert_eq!(err.status_code(), 400);
        assert_eq!(f.load(), before);
        assert_eq!(f.commit_count(), 2);

        f.commit("retype", Delta::new().insert("b")).unwrap();
        assert_eq!(f.load().content(), Delta::new().insert("b"));
        f.assert_replay_matches();
    }

    #[test]
    fn test_stale_client_compose_error() {
        let f = Fixture::new();
        f.commit("init", Delta::new().insert("Hi")).unwrap();
        let err = f.commit("past end", Delta::new().retain(5).insert("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compose);
        assert_eq!(f.commit_count(), 1);
        assert_eq!(f.load().content(), Delta::new().insert("Hi"));
    }

    #[test]
    fn test_commit_validation() {
        let f = Fixture::new();
        let err = f.commit("", Delta::new().insert("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = f.commit("empty", Delta::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let long = "m".repeat(65);
        assert_eq!(f.commit(&long, Delta::new().insert("x")).unwrap_err().kind(), ErrorKind::Validation);

        let many = (0..20).fold(Delta::new(), |d, i| {
            if i % 2 == 0 {
                d.insert("a")
            } else {
                d.insert_embed("image", serde_json::json!("x.png"))
            }
        });
        assert_eq!(f.commit("many", many).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(f.commit_count(), 0);
    }

    #[test]
    fn test_draft_lifecycle() {
        let f = Fixture::new();
        f.clock.set(100);
        let doc = f
            .engine
            .save_draft(f.doc, f.owner(), 0, Delta::new().insert("draft"), DraftMode::Replace)
            .unwrap();
        assert_eq!(doc.draft().created, Some(100));
        assert_eq!(doc.version(), 1);

        f.clock.set(200);
        let doc = f
            .engine
            .save_draft(f.doc, f.owner(), 1, Delta::new().insert("draft 2"), DraftMode::Merge)
            .unwrap();
        assert_eq!(doc.draft().created, Some(100));
        assert_eq!(doc.draft().updated, Some(200));

        f.clock.set(300);
        let doc = f
            .engine
            .save_draft(f.doc, f.owner(), 2, Delta::new().insert("draft 3"), DraftMode::Replace)
            .unwrap();
        assert_eq!(doc.draft().created, Some(300));

        let doc = f.engine.clear_draft(f.doc, f.owner(), 3).unwrap();
        assert!(!doc.has_draft());
        assert!(doc.draft().created.is_none());
        assert!(doc.history().is_empty());
        assert_eq!(doc.version(), 4);
    }

    #[test]
    fn test_commit_draft() {
        let f = Fixture::new();
        let err = f.engine.commit_draft(f.doc, f.owner(), 0, "nothing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        f.engine
            .save_draft(f.doc, f.owner(), 0, Delta::new().insert("Hi"), DraftMode::Replace)
            .unwrap();

        // A failed commit keeps the draft.
        let err = f.engine.commit_draft(f.doc, f.owner(), 1, " ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(f.load().has_draft());

        let id = f.engine.commit_draft(f.doc, f.owner(), 1, "from draft").unwrap();
        let doc = f.load();
        assert!(!doc.has_draft());
        assert_eq!(doc.history(), &[id]);
        assert_eq!(doc.content(), Delta::new().insert("Hi"));
        assert_eq!(doc.version(), 2);
        assert_eq!(f.engine.get_commit(f.doc, id, f.owner()).unwrap().message(), "from draft");
    }

    #[test]
    fn test_draft_stays_out_of_history() {
        let f = Fixture::new();
        f.commit("init", Delta::new().insert("Hi")).unwrap();
        f.engine
            .save_draft(f.doc, f.owner(), 1, Delta::new().retain(2).insert("!"), DraftMode::Merge)
            .unwrap();
        let doc = f.load();
        assert_eq!(doc.history().len(), 1);
        assert_eq!(doc.content(), Delta::new().insert("Hi"));
    }

    #[test]
    fn test_get_commit_of_other_document() {
        let f = Fixture::new();
        let other = f
            .engine
            .create_document(f.owner, NewDocument::named("Other"))
            .unwrap();
        let foreign = f
            .engine
            .add_commit(other.id(), f.owner(), 0, "init", Delta::new().insert("x"))
            .unwrap();

        let err = f.engine.get_commit(f.doc, foreign, f.owner()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.engine.get_commit(other.id(), foreign, f.owner()).is_ok());
    }

    #[test]
    fn test_create_document_validation() {
        let f = Fixture::new();
        let err = f
            .engine
            .create_document(f.owner, NewDocument::named("   "))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f
            .engine
            .create_document(f.owner, NewDocument::named("n".repeat(33)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let friend = UserId::new();
        let doc = f
            .engine
            .create_document(
                f.owner,
                NewDocument {
                    name: "  Shared  ".into(),
                    public: true,
                    collaborators: vec![friend],
                    ..NewDocument::default()
                },
            )
            .unwrap();
        assert_eq!(doc.name(), "Shared");
        assert_eq!(doc.collaborators(), &[friend]);
        assert!(doc.is_public());
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn test_list_documents_visibility() {
        let f = Fixture::new();
        let friend = UserId::new();
        f.engine
            .create_document(
                f.owner,
                NewDocument {
                    name: "Shared".into(),
                    public: false,
                    collaborators: vec![friend],
                    ..NewDocument::default()
                },
            )
            .unwrap();
        f.engine
            .create_document(
                UserId::new(),
                NewDocument {
                    name: "Open".into(),
                    public: true,
                    collaborators: vec![],
                    ..NewDocument::default()
                },
            )
            .unwrap();

        assert_eq!(f.engine.list_documents(f.owner()).unwrap().len(), 3);
        let names: Vec<String> = f
            .engine
            .list_documents(friend.into())
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Shared".to_string()));
        assert!(names.contains(&"Open".to_string()));
        assert_eq!(f.engine.list_documents(Caller::Anonymous).unwrap().len(), 1);
    }

    #[test]
    fn test_sharing_changes_are_versioned() {
        let f = Fixture::new();
        let user = UserId::new();
        let doc = f.engine.add_collaborator(f.doc, f.owner(), 0, user).unwrap();
        assert_eq!(doc.version(), 1);

        // No-op writes leave the version alone.
        let doc = f.engine.add_collaborator(f.doc, f.owner(), 1, user).unwrap();
        assert_eq!(doc.version(), 1);

        let doc = f.engine.remove_collaborator(f.doc, f.owner(), 1, user).unwrap();
        assert!(doc.collaborators().is_empty());
        assert_eq!(doc.version(), 2);

        let err = f
            .engine
            .set_public(f.doc, user.into(), 2, true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[test]
    fn test_create_with_metadata() {
        let f = Fixture::new();
        let doc = f
            .engine
            .create_document(
                f.owner,
                NewDocument {
                    name: "Poems".into(),
                    description: "Short ones".into(),
                    tags: vec![" verse ".into(), "verse".into(), "haiku".into()],
                    allow_comments: false,
                    ..NewDocument::default()
                },
            )
            .unwrap();
        assert_eq!(doc.description(), "Short ones");
        assert_eq!(doc.tags(), &["verse".to_string(), "haiku".to_string()]);
        assert!(!doc.allows_comments());
        assert!(!doc.has_adult_content());
        assert_eq!(doc.version(), 0);

        let err = f
            .engine
            .create_document(
                f.owner,
                NewDocument {
                    name: "Long".into(),
                    description: "d".repeat(41),
                    ..NewDocument::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(EngineConfig::default().max_name_len, 80);
        assert_eq!(EngineConfig::default().max_description_len, 200);
    }

    #[test]
    fn test_update_metadata() {
        let f = Fixture::new();
        let update = MetadataUpdate {
            name: Some("  Journal ".into()),
            tags: Some(vec!["daily".into()]),
            adult_content: Some(true),
            ..MetadataUpdate::default()
        };
        let doc = f.engine.update_metadata(f.doc, f.owner(), 0, update.clone()).unwrap();
        assert_eq!(doc.name(), "Journal");
        assert_eq!(doc.tags(), &["daily".to_string()]);
        assert!(doc.has_adult_content());
        assert_eq!(doc.version(), 1);

        // Unchanged values write nothing.
        let doc = f.engine.update_metadata(f.doc, f.owner(), 1, update).unwrap();
        assert_eq!(doc.version(), 1);
        assert_eq!(f.load().version(), 1);

        let bad = [
            MetadataUpdate { name: Some("   ".into()), ..MetadataUpdate::default() },
            MetadataUpdate { name: Some("n".repeat(33)), ..MetadataUpdate::default() },
            MetadataUpdate { description: Some("d".repeat(41)), ..MetadataUpdate::default() },
            MetadataUpdate { tags: Some(vec!["ok".into(), " ".into()]), ..MetadataUpdate::default() },
        ];
        for update in bad {
            let err = f.engine.update_metadata(f.doc, f.owner(), 1, update).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        let stranger = Caller::User(UserId::new());
        let err = f
            .engine
            .update_metadata(f.doc, stranger, 1, MetadataUpdate::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        let err = f
            .engine
            .update_metadata(f.doc, f.owner(), 0, MetadataUpdate::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.load().version(), 1);
    }

    #[test]
    fn test_stars() {
        let f = Fixture::new();
        let fan = UserId::new();
        let stranger = UserId::new();

        // Private documents cannot be starred by outsiders.
        let err = f.engine.star(f.doc, fan.into(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        f.engine.set_public(f.doc, f.owner(), 0, true).unwrap();
        let err = f.engine.star(f.doc, Caller::Anonymous, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let doc = f.engine.star(f.doc, fan.into(), 1).unwrap();
        assert_eq!(doc.star_count(), 1);
        assert_eq!(doc.version(), 2);
        let doc = f.engine.star(f.doc, fan.into(), 2).unwrap();
        assert_eq!(doc.version(), 2);

        let err = f.engine.star(f.doc, stranger.into(), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        f.engine.star(f.doc, stranger.into(), 2).unwrap();

        let view = f.engine.view_document(f.doc, fan.into()).unwrap();
        assert_eq!(view.starred_by, 2);
        assert!(view.is_starred);
        let view = f.engine.view_document(f.doc, Caller::Anonymous).unwrap();
        assert!(!view.is_starred);

        let doc = f.engine.unstar(f.doc, fan.into(), 3).unwrap();
        assert_eq!(doc.star_count(), 1);
        assert!(!doc.is_starred_by(fan));
        assert_eq!(doc.version(), 4);
        assert!(!f.engine.view_document(f.doc, fan.into()).unwrap().is_starred);
    }

    #[test]
    fn test_delete_document_cascades() {
        let f = Fixture::new();
        f.commit("a", Delta::new().insert("a")).unwrap();
        f.commit("b", Delta::new().retain(1).insert("b")).unwrap();
        let other = f
            .engine
            .create_document(f.owner, NewDocument::named("Other"))
            .unwrap();
        f.engine
            .add_commit(other.id(), f.owner(), 0, "c", Delta::new().insert("c"))
            .unwrap();

        let stranger = Caller::User(UserId::new());
        assert_eq!(
            f.engine.delete_document(f.doc, stranger).unwrap_err().kind(),
            ErrorKind::Permission
        );

        assert_eq!(f.engine.delete_document(f.doc, f.owner()).unwrap(), 2);
        assert_eq!(f.commit_count(), 1);
        assert_eq!(
            f.engine.get_document(f.doc, f.owner()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_concurrent_commits_one_winner() {
        let f = Arc::new(Fixture::new());
        let barrier = Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let f = Arc::clone(&f);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    f.engine.add_commit(
                        f.doc,
                        f.owner(),
                        0,
                        &format!("writer {i}"),
                        Delta::new().insert("x"),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.kind() == ErrorKind::Conflict));
        assert_eq!(f.load().history().len(), 1);
        assert_eq!(f.commit_count(), 1);
    }
}
