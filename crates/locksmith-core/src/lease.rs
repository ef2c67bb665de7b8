//! Lease Registry
//!
//! Keeps one min-heap of pending lease deadlines for the whole table. Every
//! renewal pushes a new `(deadline, name, epoch)` entry and records the epoch
//! as the live one for that name; superseded heap entries are skipped when
//! they come due, which gives "last renewal wins" without searching the heap
//! to cancel. The heap is rebuilt from the live set once stale entries
//! outnumber live ones.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

/// Default lease timeout applied to every lock
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(10);

const COMPACT_SLACK: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaseEntry {
    deadline: Instant,
    epoch: u64,
    name: String,
}

impl Ord for LeaseEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.epoch.cmp(&other.epoch))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for LeaseEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A lease that reached its deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueLease {
    pub name: String,
    pub epoch: u64,
}

#[derive(Default)]
struct LeaseQueue {
    heap: BinaryHeap<Reverse<LeaseEntry>>,
    /// Live lease per name: (epoch, deadline)
    live: HashMap<String, (u64, Instant)>,
}

impl LeaseQueue {
    fn compact(&mut self) {
        self.heap = self
            .live
            .iter()
            .map(|(name, &(epoch, deadline))| {
                Reverse(LeaseEntry {
                    deadline,
                    epoch,
                    name: name.clone(),
                })
            })
            .collect();
    }
}

pub struct LeaseRegistry {
    timeout: Duration,
    queue: Mutex<LeaseQueue>,
    notify: Notify,
}

impl LeaseRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            queue: Mutex::new(LeaseQueue::default()),
            notify: Notify::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline_from(&self, now: Instant) -> Instant {
        now + self.timeout
    }

    /// Schedule expiry of `name` at `deadline`, superseding any earlier lease.
    pub fn schedule(&self, name: &str, epoch: u64, deadline: Instant) {
        let wake = {
            let mut queue = self.queue.lock();
            let earliest = queue.heap.peek().map(|Reverse(entry)| entry.deadline);
            queue.live.insert(name.to_string(), (epoch, deadline));
            queue.heap.push(Reverse(LeaseEntry {
                deadline,
                epoch,
                name: name.to_string(),
            }));
            if queue.heap.len() > queue.live.len() * 2 + COMPACT_SLACK {
                queue.compact();
            }
            earliest.is_none_or(|current| deadline < current)
        };

        trace!(lock = name, epoch, "Lease scheduled");

        if wake {
            self.notify.notify_one();
        }
    }

    /// Drop the live lease for `name`, if any.
    pub fn cancel(&self, name: &str) {
        if self.queue.lock().live.remove(name).is_some() {
            trace!(lock = name, "Lease cancelled");
        }
    }

    /// Number of live leases.
    pub fn pending(&self) -> usize {
        self.queue.lock().live.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue
            .lock()
            .heap
            .peek()
            .map(|Reverse(entry)| entry.deadline)
    }

    /// Pop every live lease whose deadline is at or before `now`.
    pub fn pop_due(&self, now: Instant) -> Vec<DueLease> {
        let mut queue = self.queue.lock();
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = queue.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(Reverse(entry)) = queue.heap.pop() else {
                break;
            };
            if queue.live.get(&entry.name).map(|&(epoch, _)| epoch) == Some(entry.epoch) {
                queue.live.remove(&entry.name);
                due.push(DueLease {
                    name: entry.name,
                    epoch: entry.epoch,
                });
            }
        }
        due
    }

    /// Sleep until the earliest deadline, or until an earlier one is scheduled.
    pub async fn wait_for_work(&self) {
        match self.next_deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = self.notify.notified() => {}
                }
            }
            None => self.notify.notified().await,
        }
    }
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TIMEOUT)
    }
}
