//! Locksmith Core - lock table and lease registry
//!
//! This crate provides:
//! - Lock data model (`LockMode`, `LockState`, `LockRecord`)
//! - The concurrency-safe lock table with non-blocking acquire/release
//! - Lease-based automatic revocation of abandoned locks
//! - Lock statistics

pub mod error;
pub mod lease;
pub mod model;
pub mod table;

pub use error::{InvalidLockMode, LockError, Result};
pub use lease::{DEFAULT_LEASE_TIMEOUT, DueLease, LeaseRegistry};
pub use model::{Admission, Departure, LockMode, LockRecord, LockSnapshot, LockState};
pub use table::{LockGrant, LockRelease, LockStats, LockTable};
