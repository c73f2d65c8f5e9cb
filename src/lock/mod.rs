//! The Lock Manager (spec Section 4.C): hierarchical, multi-granularity
//! locking with next-key locks at the leaf level for phantom
//! prevention, and eager deadlock detection via a wait-for graph.
//!
//! Grounded on the teacher's `transaction/concurrent_status.rs`
//! (`request_latch`'s poll-with-timeout loop, `add_latch`'s
//! idempotent grant check, graph update before the blocking wait) and
//! `transaction/wait_for_graph.rs` (ported to [`wait_for_graph`] near
//! verbatim). The teacher only has S/X; this generalizes the
//! compatibility check to the full `{IS, IX, S, SIX, U, X}` set the
//! spec requires for hierarchical locking.

mod wait_for_graph;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::error::RssError;
use crate::page_id::PageId;
use crate::types::VoidResult;
use wait_for_graph::WaitForGraph;

const TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IS,
    IX,
    S,
    SIX,
    U,
    X,
}

impl LockMode {
    /// Standard multi-granularity compatibility matrix, plus `U`
    /// (update intent): compatible with readers (`IS`/`S`) so a reader
    /// doesn't block a future writer from declaring intent, incompatible
    /// with anything that could itself become a writer.
    fn compatible_with(self, held: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, held),
            (IS, IS) | (IS, IX) | (IS, S) | (IS, SIX) | (IS, U)
                | (IX, IS) | (IX, IX)
                | (S, IS) | (S, S) | (S, U)
                | (SIX, IS)
                | (U, IS) | (U, S)
        )
    }
}

/// A lockable resource. The three granularities form a hierarchy:
/// `Container` holds intent locks while pages or keys within it are
/// locked, `Key` is what next-key locking actually locks (the entry at
/// `key` plus the gap up to the next existing key, per spec Section
/// 4.D "Next-key locking").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Container(u32),
    Page(PageId),
    Key { index_id: u32, key: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDuration {
    /// released as soon as the acquiring call returns.
    Instant,
    /// held until an explicit `release`.
    Manual,
    /// held until the owning transaction commits or aborts.
    Commit,
}

struct Grant {
    tx: TransactionId,
    mode: LockMode,
}

struct Inner {
    grants: HashMap<Resource, Vec<Grant>>,
    /// resources a transaction holds with `Commit` or `Manual` duration,
    /// so `release_all` doesn't need to scan every resource.
    held_by_tx: HashMap<TransactionId, HashSet<Resource>>,
    wait_for: WaitForGraph,
}

pub struct LockManager {
    inner: Mutex<Inner>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                grants: HashMap::new(),
                held_by_tx: HashMap::new(),
                wait_for: WaitForGraph::new(),
            }),
        }
    }

    /// `acquire(tx, resource, mode, duration)` (spec Section 4.C).
    /// Blocking; detects deadlock via the wait-for graph before falling
    /// back to polling, and times out after [`TIMEOUT`] if no cycle is
    /// found but the lock still can't be granted (e.g. a starved
    /// request behind a long queue).
    pub fn acquire(
        &self,
        tx: TransactionId,
        resource: Resource,
        mode: LockMode,
        duration: LockDuration,
    ) -> VoidResult {
        {
            let mut inner = self.inner.lock().unwrap();
            self.update_wait_for_graph(&mut inner, tx, &resource, mode);
            if inner.wait_for.exists_cycle() {
                inner.wait_for.remove_waiter(tx);
                return Err(RssError::deadlock(format!(
                    "tx {} acquiring {:?} on {:?} would deadlock",
                    tx, mode, resource
                )));
            }
        }

        let start = Instant::now();
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if Self::try_grant(&mut inner, tx, &resource, mode) {
                    inner.wait_for.remove_waiter(tx);
                    if duration != LockDuration::Instant {
                        inner
                            .held_by_tx
                            .entry(tx)
                            .or_insert_with(HashSet::new)
                            .insert(resource.clone());
                    } else {
                        Self::remove_grant(&mut inner, tx, &resource);
                    }
                    return Ok(());
                }
            }
            if start.elapsed() > TIMEOUT {
                let mut inner = self.inner.lock().unwrap();
                inner.wait_for.remove_waiter(tx);
                return Err(RssError::lock_timeout(format!(
                    "tx {} timed out acquiring {:?} on {:?}",
                    tx, mode, resource
                )));
            }
            sleep(POLL_INTERVAL);
        }
    }

    fn update_wait_for_graph(&self, inner: &mut Inner, tx: TransactionId, resource: &Resource, mode: LockMode) {
        if let Some(holders) = inner.grants.get(resource) {
            for grant in holders {
                if grant.tx != tx && !mode.compatible_with(grant.mode) {
                    inner.wait_for.add_edge(tx, grant.tx);
                }
            }
        }
    }

    /// Idempotent: granting a mode the transaction already holds (or a
    /// weaker one already subsumed by its current grant) succeeds
    /// without adding a duplicate entry.
    fn try_grant(inner: &mut Inner, tx: TransactionId, resource: &Resource, mode: LockMode) -> bool {
        let holders = inner.grants.entry(resource.clone()).or_insert_with(Vec::new);
        if let Some(existing) = holders.iter_mut().find(|g| g.tx == tx) {
            if existing.mode == mode {
                return true;
            }
            if holders
                .iter()
                .all(|g| g.tx == tx || mode.compatible_with(g.mode))
            {
                existing.mode = mode;
                return true;
            }
            return false;
        }
        if holders.iter().all(|g| mode.compatible_with(g.mode)) {
            holders.push(Grant { tx, mode });
            true
        } else {
            false
        }
    }

    fn remove_grant(inner: &mut Inner, tx: TransactionId, resource: &Resource) {
        if let Some(holders) = inner.grants.get_mut(resource) {
            holders.retain(|g| g.tx != tx);
            if holders.is_empty() {
                inner.grants.remove(resource);
            }
        }
    }

    /// `release(tx, resource)` (spec Section 4.C), for `Manual`-duration
    /// locks released before commit (e.g. a B-tree latch-mode lock
    /// released once a traversal descends past it).
    pub fn release(&self, tx: TransactionId, resource: &Resource) {
        let mut inner = self.inner.lock().unwrap();
        Self::remove_grant(&mut inner, tx, resource);
        if let Some(set) = inner.held_by_tx.get_mut(&tx) {
            set.remove(resource);
        }
    }

    /// `releaseAll(tx)` (spec Section 4.C): called by the transaction
    /// manager at commit/abort to drop every `Commit`-duration lock.
    pub fn release_all(&self, tx: TransactionId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(resources) = inner.held_by_tx.remove(&tx) {
            for resource in resources {
                Self::remove_grant(&mut inner, tx, &resource);
            }
        }
        inner.wait_for.remove_transaction(tx);
    }

    #[cfg(test)]
    fn held_mode(&self, tx: TransactionId, resource: &Resource) -> Option<LockMode> {
        let inner = self.inner.lock().unwrap();
        inner
            .grants
            .get(resource)
            .and_then(|holders| holders.iter().find(|g| g.tx == tx).map(|g| g.mode))
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &[u8]) -> Resource {
        Resource::Key {
            index_id: 1,
            key: k.to_vec(),
        }
    }

    #[test]
    fn shared_locks_are_compatible() {
        let lm = LockManager::new();
        lm.acquire(1, key(b"a"), LockMode::S, LockDuration::Commit).unwrap();
        lm.acquire(2, key(b"a"), LockMode::S, LockDuration::Commit).unwrap();
        assert_eq!(lm.held_mode(1, &key(b"a")), Some(LockMode::S));
        assert_eq!(lm.held_mode(2, &key(b"a")), Some(LockMode::S));
    }

    #[test]
    fn exclusive_blocks_until_released() {
        let lm = std::sync::Arc::new(LockManager::new());
        lm.acquire(1, key(b"a"), LockMode::X, LockDuration::Commit).unwrap();

        let lm2 = std::sync::Arc::clone(&lm);
        let handle = std::thread::spawn(move || {
            lm2.acquire(2, key(b"a"), LockMode::X, LockDuration::Commit)
        });

        std::thread::sleep(Duration::from_millis(50));
        lm.release_all(1);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn instant_lock_is_not_retained() {
        let lm = LockManager::new();
        lm.acquire(1, key(b"a"), LockMode::S, LockDuration::Instant)
            .unwrap();
        assert_eq!(lm.held_mode(1, &key(b"a")), None);
    }

    #[test]
    fn deadlock_is_detected() {
        let lm = std::sync::Arc::new(LockManager::new());
        lm.acquire(1, key(b"a"), LockMode::X, LockDuration::Commit).unwrap();
        lm.acquire(2, key(b"b"), LockMode::X, LockDuration::Commit).unwrap();

        let lm2 = std::sync::Arc::clone(&lm);
        let handle = std::thread::spawn(move || {
            lm2.acquire(2, key(b"a"), LockMode::X, LockDuration::Commit)
        });
        std::thread::sleep(Duration::from_millis(50));

        let result = lm.acquire(1, key(b"b"), LockMode::X, LockDuration::Commit);
        assert!(result.is_err());
        lm.release_all(2);
        let _ = handle.join();
    }
}
