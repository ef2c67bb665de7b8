//! Lock table error types

use crate::model::{LockMode, LockState};

/// Expected, recoverable outcomes of lock table operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock '{name}' denied to '{client}' for {requested}: currently {held}")]
    Denied {
        name: String,
        client: String,
        requested: LockMode,
        held: LockState,
    },

    #[error("lock '{name}' is not held by '{client}'")]
    NotHeld { name: String, client: String },
}

/// Unrecognized lock mode token
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid lock mode '{0}', expected READ or WRITE")]
pub struct InvalidLockMode(pub String);

pub type Result<T> = std::result::Result<T, LockError>;
