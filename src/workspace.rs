use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::debug;

use crate::data_store::entity::Row;
use crate::data_store::resource_key::ResourceKey;

/// What a workspace knows about a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceLookup<'a> {
    /// The transaction has staged this row.
    Staged(&'a Row),
    /// The transaction has deleted this row.
    Deleted,
    /// The transaction has not touched this key; consult the committed snapshot.
    Untouched,
}

/// A transaction's private, copy-on-write record of pending changes.
///
/// A key is in at most one of `updates` and `deletes` at any time. The
/// workspace takes no locks: callers acquire the proper lock before reading
/// or mutating it.
#[derive(Debug, Default, Clone)]
pub struct Workspace {
    updates: HashMap<ResourceKey, Row>,
    deletes: HashSet<ResourceKey>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an upsert. A pending delete of the same key is dropped, so an
    /// add after a delete in one transaction brings the row back.
    pub fn record_update(&mut self, key: ResourceKey, row: Row) {
        if self.deletes.remove(&key) {
            debug!("Workspace: {} un-deleted by update", key);
        }
        self.updates.insert(key, row);
    }

    /// Stages a removal, discarding any pending upsert of the same key.
    pub fn record_delete(&mut self, key: ResourceKey) {
        self.updates.remove(&key);
        self.deletes.insert(key);
    }

    pub fn lookup(&self, key: &ResourceKey) -> WorkspaceLookup<'_> {
        if let Some(row) = self.updates.get(key) {
            WorkspaceLookup::Staged(row)
        } else if self.deletes.contains(key) {
            WorkspaceLookup::Deleted
        } else {
            WorkspaceLookup::Untouched
        }
    }

    /// Pending upserts.
    pub fn updates(&self) -> impl Iterator<Item = (&ResourceKey, &Row)> {
        self.updates.iter()
    }

    /// Pending removals.
    pub fn deletes(&self) -> impl Iterator<Item = &ResourceKey> {
        self.deletes.iter()
    }

    pub fn is_updated(&self, key: &ResourceKey) -> bool {
        self.updates.contains_key(key)
    }

    pub fn is_deleted(&self, key: &ResourceKey) -> bool {
        self.deletes.contains(key)
    }

    /// Number of keys touched.
    pub fn len(&self) -> usize {
        self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }
}
