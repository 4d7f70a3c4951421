//! # folio-core: Revision model for Folio documents
//!
//! Pure data and algorithms, no I/O:
//!
//! ```text
//!  Commit.ops ──► compose ──► Document.current.composed
//!      │                              ▲
//!      └──── replay(history) ─────────┘
//! ```
//!
//! ## Modules
//!
//! - [`delta`]: Rich-text delta ops, canonical form and `compose`
//! - [`commit`]: Immutable commit records and `replay`
//! - [`document`]: The Document aggregate with draft and history
//! - [`permission`]: Owner > Collaborator > Public > None
//! - [`error`]: Error taxonomy shared by the engine and storage

pub mod commit;
pub mod delta;
pub mod document;
pub mod error;
pub mod ids;
pub mod permission;

pub use commit::{replay, Commit};
pub use delta::{compose, compose_all, compose_onto, Attributes, Delta, DeltaError, Insert, Op, OpKind};
pub use document::{
    Current, Document, DocumentView, Draft, DraftMode, MetadataUpdate, RevisionState, Star,
};
pub use error::{ErrorKind, RevisionError};
pub use ids::{CommitId, DocumentId, UserId};
pub use permission::{Caller, DocumentPermissions, PermissionResolver, PermissionTier};
