//! Revision error taxonomy.
//!
//! Every failed engine call produces exactly one [`RevisionError`]. The HTTP
//! layer maps [`RevisionError::status_code`] onto its responses.

use thiserror::Error;

use crate::delta::DeltaError;
use crate::permission::PermissionTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Permission,
    Conflict,
    Compose,
    Storage,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RevisionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: requires {required:?}, caller is {actual:?}")]
    Permission {
        required: PermissionTier,
        actual: PermissionTier,
    },

    #[error("Version conflict: expected {expected}, stored {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Compose error: {0}")]
    Compose(String),

    /// Infrastructure failure below the engine (I/O, corrupt record).
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RevisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RevisionError::Validation(_) => ErrorKind::Validation,
            RevisionError::NotFound(_) => ErrorKind::NotFound,
            RevisionError::Permission { .. } => ErrorKind::Permission,
            RevisionError::Conflict { .. } => ErrorKind::Conflict,
            RevisionError::Compose(_) => ErrorKind::Compose,
            RevisionError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// HTTP status class for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Compose => 400,
            ErrorKind::Permission => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Storage => 500,
        }
    }
}

impl From<DeltaError> for RevisionError {
    fn from(e: DeltaError) -> Self {
        match e {
            DeltaError::Malformed(_) => RevisionError::Validation(e.to_string()),
            DeltaError::LengthMismatch { .. } => RevisionError::Compose(e.to_string()),
        }
    }
}
