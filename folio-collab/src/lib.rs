//! # folio-collab: Storage and revision engine for Folio documents
//!
//! Turns incremental deltas into an append-only commit history with a
//! materialized current state, a mutable draft, and revert by truncation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   spawn_blocking   ┌────────────────┐
//! │ AsyncRevisionEngine  │ ─────────────────► │ RevisionEngine │
//! │ (tokio callers)      │                    │ (sync, Arc'd)  │
//! └──────────────────────┘                    └───────┬────────┘
//!                                                     │ RevisionBatch
//!                                                     ▼
//!                                   ┌──────────────────────────────────┐
//!                                   │ DocumentStore + CommitStore      │
//!                                   │ MemoryStore | RocksDocumentStore │
//!                                   └──────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: `RevisionEngine` operations and the async facade
//! - [`storage`]: Store traits, atomic batches, in-memory and RocksDB backends

pub mod engine;
pub mod storage;

// Re-exports for convenience
pub use engine::{
    AsyncRevisionEngine, Clock, EngineConfig, NewDocument, RevisionEngine, SystemClock,
};
pub use storage::{
    CommitStore, DocumentMetadata, DocumentStore, MemoryStore, RevisionBatch,
    RocksDocumentStore, StoreConfig, StoreError,
};
