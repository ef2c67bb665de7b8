//! Lock data model
//!
//! A [`LockRecord`] is the per-name state kept by the lock table. It is only
//! ever touched while the table holds the record's shard guard, so the
//! transitions below are plain `&mut self` methods with no synchronization of
//! their own.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::InvalidLockMode;

/// Lock discipline requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockMode {
    /// Shared access, any number of concurrent holders
    Read,
    /// Exclusive access, exactly one holder
    Write,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Read => "READ",
            LockMode::Write => "WRITE",
        }
    }
}

impl Display for LockMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = InvalidLockMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(LockMode::Read),
            "WRITE" => Ok(LockMode::Write),
            other => Err(InvalidLockMode(other.to_string())),
        }
    }
}

/// Current mode of a lock record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockState {
    /// Nobody holds the lock
    #[default]
    Free,
    /// Held shared by one or more readers
    Read,
    /// Held exclusively by a single writer
    Write,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Free => "FREE",
            LockState::Read => "READ",
            LockState::Write => "WRITE",
        }
    }

    pub fn is_free(&self) -> bool {
        *self == LockState::Free
    }
}

impl Display for LockState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LockMode> for LockState {
    fn from(mode: LockMode) -> Self {
        match mode {
            LockMode::Read => LockState::Read,
            LockMode::Write => LockState::Write,
        }
    }
}

/// Outcome of a granted acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The client was added to the owner set
    Granted,
    /// The client already held the lock in read mode
    AlreadyHeld,
}

/// Outcome of a successful release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Other readers still hold the lock
    Remaining(usize),
    /// The last owner left, the lock is free
    Freed,
}

/// Per-name lock state
#[derive(Debug, Clone, Default)]
pub struct LockRecord {
    state: LockState,
    owners: BTreeSet<String>,
    lease_deadline: Option<Instant>,
    lease_epoch: u64,
}

impl LockRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.owners.iter().map(String::as_str)
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn is_held_by(&self, client: &str) -> bool {
        self.owners.contains(client)
    }

    pub fn lease_deadline(&self) -> Option<Instant> {
        self.lease_deadline
    }

    /// Generation of the currently scheduled lease; bumped on every renewal
    /// and cancellation so stale expiries can be recognized.
    pub fn lease_epoch(&self) -> u64 {
        self.lease_epoch
    }

    /// Try to admit `client` in `mode`, returning the current state on denial.
    pub fn try_acquire(&mut self, client: &str, mode: LockMode) -> Result<Admission, LockState> {
        match mode {
            LockMode::Read => {
                if self.state == LockState::Write {
                    return Err(self.state);
                }
                self.state = LockState::Read;
                if self.owners.insert(client.to_string()) {
                    Ok(Admission::Granted)
                } else {
                    Ok(Admission::AlreadyHeld)
                }
            }
            LockMode::Write => {
                // An owner set without a mode is still treated as held.
                if !self.state.is_free() || !self.owners.is_empty() {
                    return Err(self.state);
                }
                self.state = LockState::Write;
                self.owners.insert(client.to_string());
                Ok(Admission::Granted)
            }
        }
    }

    /// Remove `client` from the owners; `None` if it was not an owner.
    pub fn release(&mut self, client: &str) -> Option<Departure> {
        if !self.owners.remove(client) {
            return None;
        }
        if self.owners.is_empty() {
            self.state = LockState::Free;
            Some(Departure::Freed)
        } else {
            Some(Departure::Remaining(self.owners.len()))
        }
    }

    /// Drop every owner at once, returning how many were evicted.
    pub fn revoke(&mut self) -> usize {
        let evicted = self.owners.len();
        self.owners.clear();
        self.state = LockState::Free;
        self.cancel_lease();
        evicted
    }

    pub fn renew_lease(&mut self, deadline: Instant) -> u64 {
        self.lease_epoch += 1;
        self.lease_deadline = Some(deadline);
        self.lease_epoch
    }

    pub fn cancel_lease(&mut self) {
        self.lease_epoch += 1;
        self.lease_deadline = None;
    }

    pub fn snapshot(&self, name: &str) -> LockSnapshot {
        let now = Instant::now();
        LockSnapshot {
            name: name.to_string(),
            state: self.state,
            owners: self.owners.iter().cloned().collect(),
            lease_remaining_ms: self
                .lease_deadline
                .map(|deadline| deadline.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// Read-only copy of a lock record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSnapshot {
    pub name: String,
    pub state: LockState,
    pub owners: Vec<String>,
    #[serde(default)]
    pub lease_remaining_ms: Option<u64>,
}
