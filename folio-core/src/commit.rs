//! Immutable commit records.

use serde::{Deserialize, Serialize};

use crate::delta::{self, Delta};
use crate::error::RevisionError;
use crate::ids::{CommitId, DocumentId};

/// One delta applied to a document, with message and timestamp.
///
/// Fields are private and there are no setters: a commit never changes after
/// [`Commit::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    id: CommitId,
    document: DocumentId,
    message: String,
    ops: Delta,
    created: u64,
}

impl Commit {
    /// Build a commit record, rejecting empty messages and empty deltas.
    pub fn new(
        document: DocumentId,
        message: impl Into<String>,
        ops: Delta,
        created: u64,
    ) -> Result<Self, RevisionError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(RevisionError::Validation("commit message is required".into()));
        }
        if ops.is_empty() {
            return Err(RevisionError::Validation("commit delta must not be empty".into()));
        }
        Ok(Self {
            id: CommitId::new(),
            document,
            message,
            ops,
            created,
        })
    }

    pub fn id(&self) -> CommitId {
        self.id
    }

    pub fn document(&self) -> DocumentId {
        self.document
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn ops(&self) -> &Delta {
        &self.ops
    }

    pub fn created(&self) -> u64 {
        self.created
    }
}

/// Compose the `ops` of each commit, in order, starting from the identity.
pub fn replay(commits: &[Commit]) -> Result<Delta, RevisionError> {
    Ok(delta::compose_all(commits.iter().map(Commit::ops))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_requires_message_and_ops() {
        let doc = DocumentId::new();
        let ops = Delta::new().insert("Hi");

        assert!(Commit::new(doc, "", ops.clone(), 1).is_err());
        assert!(Commit::new(doc, "   ", ops.clone(), 1).is_err());
        assert!(Commit::new(doc, "init", Delta::new(), 1).is_err());

        let commit = Commit::new(doc, "init", ops.clone(), 7).unwrap();
        assert_eq!(commit.document(), doc);
        assert_eq!(commit.ops(), &ops);
        assert_eq!(commit.created(), 7);
    }

    #[test]
    fn test_replay_extracts_ops() {
        let doc = DocumentId::new();
        let commits = vec![
            Commit::new(doc, "init", Delta::new().insert("Hi"), 1).unwrap(),
            Commit::new(doc, "more", Delta::new().retain(2).insert(" there"), 2).unwrap(),
        ];
        assert_eq!(replay(&commits).unwrap(), Delta::new().insert("Hi there"));
        assert_eq!(replay(&[]).unwrap(), Delta::new());
    }

    #[test]
    fn test_commit_json_shape() {
        let commit = Commit::new(DocumentId::new(), "init", Delta::new().insert("Hi"), 5).unwrap();
        let value = serde_json::to_value(&commit).unwrap();
        assert_eq!(value["message"], "init");
        assert_eq!(value["ops"][0]["insert"], "Hi");
        assert_eq!(value["created"], 5);
        assert_eq!(value["document"], commit.document().to_string());
    }
}
