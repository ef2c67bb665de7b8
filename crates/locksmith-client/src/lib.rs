//! Locksmith Client - Rust client for the Locksmith lock server
//!
//! This crate provides:
//! - `LockClient`, which keeps one connection open and reconnects on demand
//! - `request_lock` / `release_lock` helpers that use a connection per call

pub mod client;
pub mod error;

pub use client::{ClientConfig, LockClient, release_lock, request_lock};
pub use error::{ClientError, Result};
pub use locksmith_api::Reply;
pub use locksmith_core::LockMode;
