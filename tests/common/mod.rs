//! Common utilities for itinerary integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ahash::AHashMap as HashMap;
use itinerary::{
    ResourceManager, ResourceManagerConfig, TableKind,
    errors::{ItineraryError, Result},
    data_store::snapshot::Table,
    storage::Storage,
};
use parking_lot::Mutex;
use tempfile::TempDir;

// --- MockStorage ---

/// A mock implementation of the `Storage` trait for testing purposes.
/// Keeps tables in an in-memory HashMap and counts calls.
#[derive(Debug, Default)]
pub struct MockStorage {
    tables: Mutex<HashMap<TableKind, Table>>,
    marker: AtomicBool,
    fail_stores: AtomicBool,
    stores: AtomicUsize,
    loads: AtomicUsize,
}

impl MockStorage {
    /// Creates a new, uninitialised `MockStorage` instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves a stored table.
    pub fn table(&self, kind: TableKind) -> Option<Table> {
        self.tables.lock().get(&kind).cloned()
    }

    /// Drops a stored table, as if its file had gone missing.
    pub fn remove_table(&self, kind: TableKind) {
        self.tables.lock().remove(&kind);
    }

    /// Makes every following `store_table` call fail.
    pub fn fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn has_marker(&self) -> bool {
        self.marker.load(Ordering::SeqCst)
    }
}

impl Storage for MockStorage {
    fn load_table(&self, kind: TableKind) -> Result<Option<Table>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().get(&kind).cloned())
    }

    fn store_table(&self, kind: TableKind, table: &Table) -> Result<()> {
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(ItineraryError::StorageError(format!(
                "mock store of {} refused",
                kind
            )));
        }
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.tables.lock().insert(kind, table.clone());
        Ok(())
    }

    fn marker_exists(&self) -> Result<bool> {
        Ok(self.marker.load(Ordering::SeqCst))
    }

    fn create_marker(&self) -> Result<()> {
        self.marker.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// --- Helper Functions ---

/// Creates a resource manager over a fresh `MockStorage`.
pub fn setup_rm() -> (Arc<ResourceManager>, Arc<MockStorage>) {
    let storage = Arc::new(MockStorage::new());
    let rm = ResourceManager::with_storage(storage.clone()).unwrap();
    (Arc::new(rm), storage)
}

/// Reopens a resource manager on existing storage, modelling a restart.
pub fn restart(storage: &Arc<MockStorage>) -> Arc<ResourceManager> {
    Arc::new(ResourceManager::with_storage(storage.clone()).unwrap())
}

/// Creates a file-backed resource manager in a temporary directory.
pub fn setup_file_rm() -> (ResourceManager, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let rm = ResourceManager::open(file_config(&dir)).unwrap();
    (rm, dir)
}

pub fn file_config(dir: &TempDir) -> ResourceManagerConfig {
    ResourceManagerConfig::with_data_dir(dir.path())
}

/// Commits cars, rooms and a flight in one transaction.
pub fn seed_inventory(rm: &ResourceManager) {
    let xid = rm.start().unwrap();
    assert!(rm.add_cars(xid, "SFO", 300, 30).unwrap());
    assert!(rm.add_rooms(xid, "SFO", 100, 120).unwrap());
    assert!(rm.add_flight(xid, "347", 230, 400).unwrap());
    rm.commit(xid).unwrap();
}
