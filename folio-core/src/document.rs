//! The Document aggregate.
//!
//! ```text
//!            add_commit                      save_draft
//!  ┌───────┐ ─────────► ┌───────────┐   ┌─────────┐ ◄────► ┌──────────┐
//!  │ Empty │            │ Committed │   │ NoDraft │        │ HasDraft │
//!  └───────┘            └───────────┘   └─────────┘ clear  └──────────┘
//!                         ▲       │
//!                         └───────┘ add_commit / revert
//! ```
//!
//! Callers never patch fields directly. Each mutation method keeps the
//! history/current pair consistent and advances `version` by one, so the
//! version read alongside a snapshot doubles as an optimistic-concurrency
//! token.

use serde::{Deserialize, Serialize};

use crate::commit::Commit;
use crate::delta::Delta;
use crate::error::RevisionError;
use crate::ids::{CommitId, DocumentId, UserId};
use crate::permission::Caller;

/// Materialized state: the last applied commit and the composed content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Current {
    pub commit: Option<CommitId>,
    #[serde(rename = "composedOps")]
    pub composed: Option<Delta>,
}

/// Uncommitted staging area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub created: Option<u64>,
    pub updated: Option<u64>,
    pub ops: Delta,
}

/// How `save_draft` treats an existing draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftMode {
    /// PUT/POST: start over with fresh timestamps.
    Replace,
    /// PATCH: keep the original `created` timestamp if there is one.
    Merge,
}

/// One user's star on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Star {
    pub user: UserId,
    pub datetime: u64,
}

/// Descriptive fields to change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub adult_content: Option<bool>,
    pub allow_comments: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionState {
    Empty,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    id: DocumentId,
    name: String,
    description: String,
    owner: UserId,
    collaborators: Vec<UserId>,
    public: bool,
    adult_content: bool,
    allow_comments: bool,
    tags: Vec<String>,
    starred_by: Vec<Star>,
    history: Vec<CommitId>,
    current: Current,
    draft: Draft,
    version: u64,
    created: u64,
    updated: u64,
}

impl Document {
    pub fn new(name: impl Into<String>, owner: UserId, now: u64) -> Self {
        Self {
            id: DocumentId::new(),
            name: name.into(),
            description: String::new(),
            owner,
            collaborators: Vec::new(),
            public: false,
            adult_content: false,
            allow_comments: true,
            tags: Vec::new(),
            starred_by: Vec::new(),
            history: Vec::new(),
            current: Current::default(),
            draft: Draft::default(),
            version: 0,
            created: now,
            updated: now,
        }
    }

    /// Initial sharing settings. Creation-time only, so the version stays 0.
    pub fn shared_with(mut self, collaborators: impl IntoIterator<Item = UserId>, public: bool) -> Self {
        for user in collaborators {
            if !self.collaborators.contains(&user) {
                self.collaborators.push(user);
            }
        }
        self.public = public;
        self
    }

    /// Initial descriptive fields. Creation-time only, so the version stays 0.
    pub fn with_metadata(mut self, update: MetadataUpdate) -> Self {
        self.apply_metadata(update);
        self
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_adult_content(&self) -> bool {
        self.adult_content
    }

    pub fn allows_comments(&self) -> bool {
        self.allow_comments
    }

    pub fn starred_by(&self) -> &[Star] {
        &self.starred_by
    }

    pub fn star_count(&self) -> usize {
        self.starred_by.len()
    }

    pub fn is_starred_by(&self, user: UserId) -> bool {
        self.starred_by.iter().any(|star| star.user == user)
    }

    pub fn collaborators(&self) -> &[UserId] {
        &self.collaborators
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn history(&self) -> &[CommitId] {
        &self.history
    }

    pub fn current(&self) -> &Current {
        &self.current
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn updated(&self) -> u64 {
        self.updated
    }

    pub fn state(&self) -> RevisionState {
        if self.history.is_empty() {
            RevisionState::Empty
        } else {
            RevisionState::Committed
        }
    }

    pub fn has_draft(&self) -> bool {
        !self.draft.ops.is_empty()
    }

    /// Composed content, or the identity delta for an empty document.
    pub fn content(&self) -> Delta {
        self.current.composed.clone().unwrap_or_default()
    }

    /// Fail with `Conflict` unless `expected` matches this snapshot.
    pub fn ensure_version(&self, expected: u64) -> Result<(), RevisionError> {
        if self.version != expected {
            return Err(RevisionError::Conflict {
                expected,
                actual: self.version,
            });
        }
        Ok(())
    }

    /// Append a freshly created commit and its composed result.
    pub fn append_commit(
        &mut self,
        commit: &Commit,
        composed: Delta,
        now: u64,
    ) -> Result<(), RevisionError> {
        self.link_commit(commit, composed)?;
        self.touch(now);
        Ok(())
    }

    /// Append a commit built from the draft and clear the draft, as one write.
    pub fn commit_draft(
        &mut self,
        commit: &Commit,
        composed: Delta,
        now: u64,
    ) -> Result<(), RevisionError> {
        self.link_commit(commit, composed)?;
        self.draft = Draft::default();
        self.touch(now);
        Ok(())
    }

    fn link_commit(&mut self, commit: &Commit, composed: Delta) -> Result<(), RevisionError> {
        if commit.document() != self.id {
            return Err(RevisionError::Validation(format!(
                "commit {} belongs to document {}",
                commit.id(),
                commit.document()
            )));
        }
        if self.history.contains(&commit.id()) {
            return Err(RevisionError::Validation(format!(
                "commit {} is already in history",
                commit.id()
            )));
        }
        self.history.push(commit.id());
        self.current = Current {
            commit: Some(commit.id()),
            composed: Some(composed),
        };
        Ok(())
    }

    /// Split history at `target`: the prefix up to and including it, and the
    /// suffix that a revert would discard.
    pub fn split_history(
        &self,
        target: CommitId,
    ) -> Result<(&[CommitId], &[CommitId]), RevisionError> {
        let index = self
            .history
            .iter()
            .position(|id| *id == target)
            .ok_or_else(|| {
                RevisionError::NotFound(format!("commit {target} is not in the history of {}", self.id))
            })?;
        Ok(self.history.split_at(index + 1))
    }

    /// Truncate history after `target` and install the replayed content.
    ///
    /// Returns the removed suffix in history order.
    pub fn revert_to(
        &mut self,
        target: CommitId,
        composed: Delta,
        now: u64,
    ) -> Result<Vec<CommitId>, RevisionError> {
        let keep = self.split_history(target)?.0.len();
        let removed = self.history.split_off(keep);
        self.current = Current {
            commit: Some(target),
            composed: Some(composed),
        };
        self.touch(now);
        Ok(removed)
    }

    pub fn save_draft(&mut self, ops: Delta, mode: DraftMode, now: u64) {
        let created = match mode {
            DraftMode::Replace => now,
            DraftMode::Merge => self.draft.created.unwrap_or(now),
        };
        self.draft = Draft {
            created: Some(created),
            updated: Some(now),
            ops,
        };
        self.touch(now);
    }

    pub fn clear_draft(&mut self, now: u64) {
        self.draft = Draft::default();
        self.touch(now);
    }

    /// Returns `false` (and leaves the version alone) if already present.
    pub fn add_collaborator(&mut self, user: UserId, now: u64) -> bool {
        if self.collaborators.contains(&user) {
            return false;
        }
        self.collaborators.push(user);
        self.touch(now);
        true
    }

    pub fn remove_collaborator(&mut self, user: UserId, now: u64) -> bool {
        let before = self.collaborators.len();
        self.collaborators.retain(|id| *id != user);
        if self.collaborators.len() == before {
            return false;
        }
        self.touch(now);
        true
    }

    pub fn set_public(&mut self, public: bool, now: u64) -> bool {
        if self.public == public {
            return false;
        }
        self.public = public;
        self.touch(now);
        true
    }

    /// Apply the fields of `update` that differ. Returns `false` (and leaves
    /// the version alone) when nothing changed.
    pub fn update_metadata(&mut self, update: MetadataUpdate, now: u64) -> bool {
        if !self.apply_metadata(update) {
            return false;
        }
        self.touch(now);
        true
    }

    fn apply_metadata(&mut self, update: MetadataUpdate) -> bool {
        let mut changed = false;
        if let Some(name) = update.name.filter(|name| *name != self.name) {
            self.name = name;
            changed = true;
        }
        if let Some(description) = update.description.filter(|d| *d != self.description) {
            self.description = description;
            changed = true;
        }
        if let Some(tags) = update.tags.filter(|tags| *tags != self.tags) {
            self.tags = tags;
            changed = true;
        }
        if let Some(adult) = update.adult_content.filter(|a| *a != self.adult_content) {
            self.adult_content = adult;
            changed = true;
        }
        if let Some(allow) = update.allow_comments.filter(|a| *a != self.allow_comments) {
            self.allow_comments = allow;
            changed = true;
        }
        changed
    }

    /// Returns `false` if `user` already starred the document.
    pub fn star(&mut self, user: UserId, now: u64) -> bool {
        if self.is_starred_by(user) {
            return false;
        }
        self.starred_by.push(Star { user, datetime: now });
        self.touch(now);
        true
    }

    pub fn unstar(&mut self, user: UserId, now: u64) -> bool {
        let before = self.starred_by.len();
        self.starred_by.retain(|star| star.user != user);
        if self.starred_by.len() == before {
            return false;
        }
        self.touch(now);
        true
    }

    /// Outward view for `caller`: stars collapse to a count plus whether the
    /// caller is one of them.
    pub fn into_view(self, caller: Caller) -> DocumentView {
        let is_starred = caller.user().is_some_and(|user| self.is_starred_by(user));
        DocumentView {
            id: self.id,
            name: self.name,
            description: self.description,
            owner: self.owner,
            collaborators: self.collaborators,
            public: self.public,
            adult_content: self.adult_content,
            allow_comments: self.allow_comments,
            tags: self.tags,
            starred_by: self.starred_by.len(),
            is_starred,
            history: self.history,
            current: self.current,
            draft: self.draft,
            version: self.version,
            created: self.created,
            updated: self.updated,
        }
    }

    fn touch(&mut self, now: u64) {
        self.version += 1;
        self.updated = self.updated.max(now);
    }
}

/// What a reader is sent for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: DocumentId,
    pub name: String,
    pub description: String,
    pub owner: UserId,
    pub collaborators: Vec<UserId>,
    pub public: bool,
    pub adult_content: bool,
    pub allow_comments: bool,
    pub tags: Vec<String>,
    /// Number of stars
    pub starred_by: usize,
    pub is_starred: bool,
    pub history: Vec<CommitId>,
    pub current: Current,
    pub draft: Draft,
    pub version: u64,
    pub created: u64,
    pub updated: u64,
}
