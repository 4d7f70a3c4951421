//! Caller permission tiers.
//!
//! Resolution order is strict: owner, then collaborator, then the public
//! flag. The derived `Ord` on [`PermissionTier`] follows the same order, so
//! `tier >= PermissionTier::Collaborator` reads as "at least collaborator".

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    None,
    Public,
    Collaborator,
    Owner,
}

impl PermissionTier {
    pub fn can_read(self) -> bool {
        self >= PermissionTier::Public
    }

    pub fn can_write(self) -> bool {
        self == PermissionTier::Owner
    }
}

/// Who is making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    Anonymous,
    User(UserId),
}

impl Caller {
    pub fn user(&self) -> Option<UserId> {
        match self {
            Caller::Anonymous => None,
            Caller::User(id) => Some(*id),
        }
    }
}

impl From<UserId> for Caller {
    fn from(id: UserId) -> Self {
        Caller::User(id)
    }
}

/// Derives a caller's tier for a document.
pub trait PermissionResolver: Send + Sync {
    fn resolve(&self, doc: &Document, caller: Caller) -> PermissionTier;
}

/// Ownership, collaborator list and public flag, in that order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentPermissions;

impl PermissionResolver for DocumentPermissions {
    fn resolve(&self, doc: &Document, caller: Caller) -> PermissionTier {
        resolve(doc, caller)
    }
}

pub fn resolve(doc: &Document, caller: Caller) -> PermissionTier {
    if let Caller::User(user) = caller {
        if doc.owner() == user {
            return PermissionTier::Owner;
        }
        if doc.collaborators().contains(&user) {
            return PermissionTier::Collaborator;
        }
    }
    if doc.is_public() {
        PermissionTier::Public
    } else {
        PermissionTier::None
    }
}
