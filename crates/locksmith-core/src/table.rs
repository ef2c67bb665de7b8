//! Lock Table
//!
//! The authoritative map from lock name to [`LockRecord`]. Records live in a
//! sharded `DashMap`; every operation runs while holding the record's entry
//! guard, so acquire, release and lease expiry on one name are serialized
//! while operations on other names proceed in parallel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{LockError, Result};
use crate::lease::{DEFAULT_LEASE_TIMEOUT, LeaseRegistry};
use crate::model::{Admission, Departure, LockMode, LockRecord, LockSnapshot, LockState};

/// Result of a granted acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    pub mode: LockMode,
    pub owners: usize,
    pub already_held: bool,
    pub lease_deadline: Instant,
}

/// Result of a successful release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRelease {
    /// Whether the release left the lock free
    pub freed: bool,
    pub remaining_owners: usize,
}

/// Lock table statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStats {
    /// Lock records created
    pub total_locks: u64,
    /// Locks currently held by at least one owner
    pub active_locks: u64,
    pub total_grants: u64,
    pub total_denials: u64,
    pub total_releases: u64,
    /// Releases rejected because the client was not an owner
    pub failed_releases: u64,
    /// Locks force-released by lease expiry
    pub expired_locks: u64,
}

#[derive(Default)]
struct LockStatsCollector {
    total_locks: AtomicU64,
    active_locks: AtomicU64,
    total_grants: AtomicU64,
    total_denials: AtomicU64,
    total_releases: AtomicU64,
    failed_releases: AtomicU64,
    expired_locks: AtomicU64,
}

impl LockStatsCollector {
    fn lock_created(&self) {
        self.total_locks.fetch_add(1, Ordering::Relaxed);
        counter!("locksmith_locks_created_total").increment(1);
    }

    fn lock_activated(&self) {
        let active = self.active_locks.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("locksmith_locks_active").set(active as f64);
    }

    fn lock_freed(&self) {
        let active = self
            .active_locks
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        gauge!("locksmith_locks_active").set(active as f64);
    }

    fn granted(&self, mode: LockMode) {
        self.total_grants.fetch_add(1, Ordering::Relaxed);
        counter!("locksmith_lock_grants_total", "mode" => mode.as_str()).increment(1);
    }

    fn denied(&self, mode: LockMode) {
        self.total_denials.fetch_add(1, Ordering::Relaxed);
        counter!("locksmith_lock_denials_total", "mode" => mode.as_str()).increment(1);
    }

    fn released(&self) {
        self.total_releases.fetch_add(1, Ordering::Relaxed);
        counter!("locksmith_lock_releases_total").increment(1);
    }

    fn release_failed(&self) {
        self.failed_releases.fetch_add(1, Ordering::Relaxed);
        counter!("locksmith_lock_release_failures_total").increment(1);
    }

    fn expired(&self) {
        self.expired_locks.fetch_add(1, Ordering::Relaxed);
        counter!("locksmith_lock_expirations_total").increment(1);
    }

    fn snapshot(&self) -> LockStats {
        LockStats {
            total_locks: self.total_locks.load(Ordering::Relaxed),
            active_locks: self.active_locks.load(Ordering::Relaxed),
            total_grants: self.total_grants.load(Ordering::Relaxed),
            total_denials: self.total_denials.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            failed_releases: self.failed_releases.load(Ordering::Relaxed),
            expired_locks: self.expired_locks.load(Ordering::Relaxed),
        }
    }
}

/// In-memory lock table with lease-based expiry
pub struct LockTable {
    records: DashMap<String, LockRecord>,
    leases: Arc<LeaseRegistry>,
    stats: LockStatsCollector,
}

impl LockTable {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            leases: Arc::new(LeaseRegistry::new(lease_timeout)),
            stats: LockStatsCollector::default(),
        }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.leases.timeout()
    }

    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    /// Acquire `name` for `client` in `mode`, denying immediately on conflict.
    pub fn acquire(&self, name: &str, client: &str, mode: LockMode) -> Result<LockGrant> {
        let mut record = self.records.entry(name.to_string()).or_insert_with(|| {
            self.stats.lock_created();
            LockRecord::new()
        });

        let was_free = record.state().is_free();
        match record.try_acquire(client, mode) {
            Ok(admission) => {
                let deadline = self.leases.deadline_from(Instant::now());
                let epoch = record.renew_lease(deadline);
                self.leases.schedule(name, epoch, deadline);

                if was_free {
                    self.stats.lock_activated();
                }
                self.stats.granted(mode);

                debug!(lock = name, client, %mode, owners = record.owner_count(), "Lock granted");

                Ok(LockGrant {
                    mode,
                    owners: record.owner_count(),
                    already_held: admission == Admission::AlreadyHeld,
                    lease_deadline: deadline,
                })
            }
            Err(held) => {
                self.stats.denied(mode);
                debug!(lock = name, client, %mode, %held, "Lock denied");
                Err(LockError::Denied {
                    name: name.to_string(),
                    client: client.to_string(),
                    requested: mode,
                    held,
                })
            }
        }
    }

    /// Release `client`'s hold on `name`.
    ///
    /// Releasing the last owner cancels the lease; otherwise the lease is renewed.
    pub fn release(&self, name: &str, client: &str) -> Result<LockRelease> {
        let not_held = || LockError::NotHeld {
            name: name.to_string(),
            client: client.to_string(),
        };

        let Some(mut record) = self.records.get_mut(name) else {
            self.stats.release_failed();
            return Err(not_held());
        };

        let Some(departure) = record.release(client) else {
            self.stats.release_failed();
            debug!(lock = name, client, "Release rejected, client is not an owner");
            return Err(not_held());
        };

        self.stats.released();
        let release = match departure {
            Departure::Freed => {
                record.cancel_lease();
                self.leases.cancel(name);
                self.stats.lock_freed();
                LockRelease {
                    freed: true,
                    remaining_owners: 0,
                }
            }
            Departure::Remaining(remaining) => {
                let deadline = self.leases.deadline_from(Instant::now());
                let epoch = record.renew_lease(deadline);
                self.leases.schedule(name, epoch, deadline);
                LockRelease {
                    freed: false,
                    remaining_owners: remaining,
                }
            }
        };

        debug!(lock = name, client, freed = release.freed, "Lock released");
        Ok(release)
    }

    /// Force-release `name` if its lease epoch is still `epoch`.
    ///
    /// Returns `true` when the lock was revoked. A renewal or release since the
    /// lease was scheduled moves the epoch and turns this into a no-op.
    pub fn expire(&self, name: &str, epoch: u64) -> bool {
        let Some(mut record) = self.records.get_mut(name) else {
            return false;
        };
        if record.lease_epoch() != epoch {
            return false;
        }

        let was_held = !record.state().is_free() || record.owner_count() > 0;
        let evicted = record.revoke();
        self.leases.cancel(name);
        if was_held {
            self.stats.lock_freed();
        }
        self.stats.expired();

        info!(lock = name, evicted, "Lock lease expired, lock released");
        true
    }

    /// Expire every lease that is due at `now`, returning how many locks were revoked.
    pub fn expire_due(&self, now: Instant) -> usize {
        self.leases
            .pop_due(now)
            .into_iter()
            .filter(|due| self.expire(&due.name, due.epoch))
            .count()
    }

    /// Spawn the background task that revokes locks whose lease lapsed.
    ///
    /// The task ends when `shutdown` fires or the table is dropped.
    pub fn start_reaper(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let table: Weak<Self> = Arc::downgrade(self);
        let leases = self.leases.clone();

        tokio::spawn(async move {
            info!(timeout = ?leases.timeout(), "Lease reaper started");
            loop {
                tokio::select! {
                    _ = leases.wait_for_work() => {}
                    _ = shutdown.recv() => break,
                }

                let Some(table) = table.upgrade() else {
                    break;
                };
                let expired = table.expire_due(Instant::now());
                if expired > 0 {
                    debug!(count = expired, "Expired lock leases");
                }
            }
            info!("Lease reaper stopped");
        })
    }

    pub fn state(&self, name: &str) -> Option<LockState> {
        self.records.get(name).map(|record| record.state())
    }

    pub fn snapshot(&self, name: &str) -> Option<LockSnapshot> {
        self.records.get(name).map(|record| record.snapshot(name))
    }

    /// Snapshot of every known lock, sorted by name.
    pub fn list(&self) -> Vec<LockSnapshot> {
        let mut locks: Vec<LockSnapshot> = self
            .records
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        locks.sort_by(|a, b| a.name.cmp(&b.name));
        locks
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TIMEOUT)
    }
}
