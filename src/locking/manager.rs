use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::data_store::resource_key::ResourceKey;
use crate::errors::{ItineraryError, Result};
use crate::locking::wait_for::WaitForGraph;

/// Lock mode requested on a resource key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared; any number of readers may hold it together.
    Read,
    /// Exclusive against every other transaction.
    Write,
}

impl LockMode {
    /// Checks if this mode can be held alongside `other` by a different transaction.
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Read, LockMode::Read))
    }

    /// Whether a hold in this mode already satisfies a request for `requested`.
    pub fn covers(self, requested: LockMode) -> bool {
        self == LockMode::Write || requested == LockMode::Read
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "READ"),
            LockMode::Write => write!(f, "WRITE"),
        }
    }
}

/// How a successful `lock` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    /// A new hold was recorded.
    Granted,
    /// An existing READ hold was raised to WRITE.
    Upgraded,
    /// The transaction already held a sufficient lock.
    AlreadyHeld,
}

/// Lock manager counters.
#[derive(Debug, Default)]
pub struct LockStats {
    pub acquisitions: AtomicU64,
    pub upgrades: AtomicU64,
    pub waits: AtomicU64,
    pub deadlocks: AtomicU64,
    pub releases: AtomicU64,
}

impl LockStats {
    pub fn deadlocks(&self) -> u64 {
        self.deadlocks.load(Ordering::Relaxed)
    }

    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn upgrades(&self) -> u64 {
        self.upgrades.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: HashMap<u64, LockMode>,
    /// Transactions currently blocked on this key.
    waiters: usize,
}

impl LockEntry {
    /// Other transactions whose holds prevent `txn_id` from taking `mode`.
    fn blockers(&self, txn_id: u64, mode: LockMode) -> Vec<u64> {
        self.holders
            .iter()
            .filter(|(holder, held)| **holder != txn_id && !mode.is_compatible_with(**held))
            .map(|(holder, _)| *holder)
            .collect()
    }

    fn is_free(&self) -> bool {
        self.holders.is_empty() && self.waiters == 0
    }
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<ResourceKey, LockEntry>,
    /// Keys each transaction holds, for `unlock_all`.
    held: HashMap<u64, HashSet<ResourceKey>>,
    wait_for: WaitForGraph,
    halted: bool,
}

enum Attempt {
    Acquired(LockGrant),
    Blocked(Vec<u64>),
}

impl LockTable {
    fn try_acquire(&mut self, txn_id: u64, key: &ResourceKey, mode: LockMode) -> Attempt {
        let entry = self.entries.entry(key.clone()).or_default();

        if let Some(held) = entry.holders.get(&txn_id) {
            if held.covers(mode) {
                return Attempt::Acquired(LockGrant::AlreadyHeld);
            }
        }

        let blockers = entry.blockers(txn_id, mode);
        if !blockers.is_empty() {
            return Attempt::Blocked(blockers);
        }

        let grant = match entry.holders.insert(txn_id, mode) {
            Some(_) => LockGrant::Upgraded,
            None => LockGrant::Granted,
        };
        self.held.entry(txn_id).or_default().insert(key.clone());
        self.wait_for.clear_waits(txn_id);
        Attempt::Acquired(grant)
    }

    /// Drops one waiter from `key` and prunes the entry if nothing remains.
    fn leave_queue(&mut self, key: &ResourceKey) {
        let free = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.waiters = entry.waiters.saturating_sub(1);
                entry.is_free()
            }
            None => false,
        };
        if free {
            self.entries.remove(key);
        }
    }

    fn prune(&mut self, key: &ResourceKey) {
        if self.entries.get(key).is_some_and(|e| e.is_free()) {
            self.entries.remove(key);
        }
    }
}

/// Strict two-phase lock manager over resource keys.
///
/// Requests that conflict with another transaction's hold block on a
/// condition variable until a release. Every blocked request records its
/// wait-for edges and checks for a cycle through itself before sleeping; a
/// request that closes a cycle fails with [`ItineraryError::Deadlock`]. The
/// manager never picks a victim on its own: the caller is expected to
/// `unlock_all` the failed transaction.
pub struct LockManager {
    table: Mutex<LockTable>,
    changed: Condvar,
    stats: LockStats,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            changed: Condvar::new(),
            stats: LockStats::default(),
        }
    }

    /// Acquires `mode` on `key` for `txn_id`, blocking while another
    /// transaction holds a conflicting lock.
    ///
    /// # Errors
    ///
    /// * [`ItineraryError::Deadlock`] if waiting would close a cycle in the
    ///   wait-for graph. No lock is released.
    /// * [`ItineraryError::Halted`] once [`LockManager::shutdown`] was called.
    pub fn lock(&self, txn_id: u64, key: &ResourceKey, mode: LockMode) -> Result<LockGrant> {
        let mut table = self.table.lock();
        let mut queued = false;

        loop {
            if table.halted {
                if queued {
                    table.wait_for.clear_waits(txn_id);
                    table.leave_queue(key);
                }
                return Err(ItineraryError::Halted);
            }

            match table.try_acquire(txn_id, key, mode) {
                Attempt::Acquired(grant) => {
                    if queued {
                        table.leave_queue(key);
                    }
                    match grant {
                        LockGrant::Granted => {
                            self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
                        }
                        LockGrant::Upgraded => {
                            self.stats.upgrades.fetch_add(1, Ordering::Relaxed);
                        }
                        LockGrant::AlreadyHeld => {}
                    }
                    if grant != LockGrant::AlreadyHeld {
                        debug!("Tx {} acquired {} on {} ({:?})", txn_id, mode, key, grant);
                        // Holder sets changed: waiters must refresh their wait-for edges.
                        self.changed.notify_all();
                    }
                    return Ok(grant);
                }
                Attempt::Blocked(blockers) => {
                    if !queued {
                        queued = true;
                        if let Some(entry) = table.entries.get_mut(key) {
                            entry.waiters += 1;
                        }
                        self.stats.waits.fetch_add(1, Ordering::Relaxed);
                    }

                    debug!("Tx {} waits for {} on {} held by {:?}", txn_id, mode, key, blockers);
                    table.wait_for.set_waits(txn_id, blockers);

                    if let Some(cycle) = table.wait_for.find_cycle(txn_id) {
                        table.wait_for.clear_waits(txn_id);
                        table.leave_queue(key);
                        self.stats.deadlocks.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Deadlock: Tx {} requesting {} on {} closes cycle {:?}",
                            txn_id, mode, key, cycle
                        );
                        return Err(ItineraryError::Deadlock {
                            txn_id,
                            key: key.clone(),
                        });
                    }

                    self.changed.wait(&mut table);
                }
            }
        }
    }

    /// Releases every lock held by `txn_id` and wakes blocked requests.
    ///
    /// Returns the number of keys released. Calling it for a transaction with
    /// no locks is a no-op.
    pub fn unlock_all(&self, txn_id: u64) -> usize {
        let mut table = self.table.lock();
        let keys = table.held.remove(&txn_id).unwrap_or_default();

        for key in &keys {
            if let Some(entry) = table.entries.get_mut(key) {
                entry.holders.remove(&txn_id);
            }
            table.prune(key);
        }
        table.wait_for.remove_txn(txn_id);
        drop(table);

        if !keys.is_empty() {
            self.stats
                .releases
                .fetch_add(keys.len() as u64, Ordering::Relaxed);
            debug!("Tx {} released {} locks", txn_id, keys.len());
        }
        self.changed.notify_all();
        keys.len()
    }

    /// Fails all pending and future lock requests with [`ItineraryError::Halted`].
    pub fn shutdown(&self) {
        self.table.lock().halted = true;
        self.changed.notify_all();
    }

    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Number of keys with a holder or a waiter.
    pub fn lock_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Keys currently held by `txn_id`.
    pub fn held_keys(&self, txn_id: u64) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self
            .table
            .lock()
            .held
            .get(&txn_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Current holders of `key` and their modes.
    pub fn holders(&self, key: &ResourceKey) -> Vec<(u64, LockMode)> {
        let mut holders: Vec<(u64, LockMode)> = self
            .table
            .lock()
            .entries
            .get(key)
            .map(|e| e.holders.iter().map(|(id, mode)| (*id, *mode)).collect())
            .unwrap_or_default();
        holders.sort_by_key(|(id, _)| *id);
        holders
    }

    /// Whether `txn_id` is currently blocked.
    pub fn is_waiting(&self, txn_id: u64) -> bool {
        self.table.lock().wait_for.waits_for(txn_id).is_some()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        f.debug_struct("LockManager")
            .field("lock_count", &table.entries.len())
            .field("txn_count", &table.held.len())
            .field("waiting", &table.wait_for.len())
            .finish()
    }
}
