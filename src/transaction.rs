use std::sync::Arc;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::debug;
use parking_lot::Mutex;

use crate::errors::{ItineraryError, Result};
use crate::workspace::Workspace;

/// A single transaction: its identifier plus its private workspace.
///
/// Transactions are created by [`TransactionRegistry::begin`] and only ever
/// reached through the resource manager, which holds the transaction's mutex
/// while an operation runs on its behalf.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    workspace: Workspace,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            workspace: Workspace::new(),
        }
    }

    /// Returns the unique identifier of the transaction.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    /// Drops every staged change, leaving an empty workspace.
    pub fn discard(&mut self) {
        if !self.workspace.is_empty() {
            debug!(
                "Tx {} discarding {} staged keys",
                self.id,
                self.workspace.len()
            );
        }
        self.workspace = Workspace::new();
    }
}

/// Shared handle to an active transaction.
pub type TransactionHandle = Arc<Mutex<Transaction>>;

#[derive(Debug, Default)]
struct Sets {
    active: HashMap<u64, TransactionHandle>,
    /// Active transactions whose commit is under way.
    committing: HashSet<u64>,
    aborted: HashSet<u64>,
}

impl Sets {
    fn usable(&self, txn_id: u64) -> Result<TransactionHandle> {
        if self.aborted.contains(&txn_id) {
            return Err(ItineraryError::TransactionAborted(txn_id));
        }
        if self.committing.contains(&txn_id) {
            return Err(ItineraryError::InvalidTransaction(txn_id));
        }
        self.active
            .get(&txn_id)
            .cloned()
            .ok_or(ItineraryError::InvalidTransaction(txn_id))
    }
}

/// Bookkeeping of every transaction the resource manager has started.
///
/// An identifier is active from `begin` until its commit has released its
/// locks, or until it aborts. Aborted identifiers are remembered so later
/// calls can be told apart from calls with an identifier that was never
/// issued.
#[derive(Debug)]
pub struct TransactionRegistry {
    next_id: Mutex<u64>,
    sets: Mutex<Sets>,
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            sets: Mutex::new(Sets::default()),
        }
    }

    /// Allocates the next identifier and registers a fresh transaction.
    pub fn begin(&self) -> u64 {
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.sets
            .lock()
            .active
            .insert(id, Arc::new(Mutex::new(Transaction::new(id))));
        id
    }

    /// Returns the active transaction `txn_id`.
    ///
    /// # Errors
    ///
    /// [`ItineraryError::TransactionAborted`] if it was aborted,
    /// [`ItineraryError::InvalidTransaction`] if it is not active or is
    /// committing.
    pub fn get(&self, txn_id: u64) -> Result<TransactionHandle> {
        self.sets.lock().usable(txn_id)
    }

    pub fn is_active(&self, txn_id: u64) -> bool {
        self.sets.lock().active.contains_key(&txn_id)
    }

    pub fn is_aborted(&self, txn_id: u64) -> bool {
        self.sets.lock().aborted.contains(&txn_id)
    }

    /// Moves `txn_id` from active to aborted. Returns the transaction if it
    /// was active.
    pub fn mark_aborted(&self, txn_id: u64) -> Option<TransactionHandle> {
        let mut sets = self.sets.lock();
        let handle = sets.active.remove(&txn_id);
        sets.committing.remove(&txn_id);
        if handle.is_some() {
            sets.aborted.insert(txn_id);
        }
        handle
    }

    /// Validates `txn_id` and moves it to the aborted set in one step.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionRegistry::get`].
    pub fn abort(&self, txn_id: u64) -> Result<TransactionHandle> {
        let mut sets = self.sets.lock();
        let handle = sets.usable(txn_id)?;
        sets.active.remove(&txn_id);
        sets.aborted.insert(txn_id);
        Ok(handle)
    }

    /// Marks `txn_id` as committing. It stays active, and keeps its locks,
    /// until [`TransactionRegistry::finish_commit`].
    ///
    /// # Errors
    ///
    /// Same as [`TransactionRegistry::get`].
    pub fn begin_commit(&self, txn_id: u64) -> Result<TransactionHandle> {
        let mut sets = self.sets.lock();
        let handle = sets.usable(txn_id)?;
        sets.committing.insert(txn_id);
        Ok(handle)
    }

    /// Retires a committed transaction once its locks are released.
    pub fn finish_commit(&self, txn_id: u64) {
        let mut sets = self.sets.lock();
        sets.committing.remove(&txn_id);
        sets.active.remove(&txn_id);
    }

    pub fn is_committing(&self, txn_id: u64) -> bool {
        self.sets.lock().committing.contains(&txn_id)
    }

    /// Identifiers of all active transactions, in ascending order.
    pub fn active_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.sets.lock().active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.sets.lock().active.len()
    }
}
