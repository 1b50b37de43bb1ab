mod common;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use itinerary::{
    CommitOutcome, CrashHook, CrashPoint, FileStorage, ItineraryError, ResourceKey,
    ResourceManager, ResourceManagerConfig, Result, Row, Storage, TableKind,
};

use common::{MockStorage, file_config, restart, seed_inventory, setup_file_rm, setup_rm};

#[test]
fn test_crash_before_switch_keeps_previous_state() {
    let (rm, dir) = setup_file_rm();
    seed_inventory(&rm);

    let xid = rm.start().unwrap();
    assert!(rm.add_rooms(xid, "Stanford", 200, 150).unwrap());
    assert!(rm.add_cars(xid, "SFO", 10, 60).unwrap());

    rm.crash_switches().unwrap().arm_crash_before_switch();
    match rm.commit(xid) {
        Err(ItineraryError::SimulatedCrash(CrashPoint::BeforeSwitch)) => {}
        other => panic!("expected crash before switch, got {:?}", other),
    }
    assert!(rm.is_halted());
    // The new snapshot never became visible.
    assert!(rm.snapshot().get(&ResourceKey::hotel("Stanford")).is_none());
    drop(rm);

    let rm = ResourceManager::open(file_config(&dir)).unwrap();
    let xid = rm.start().unwrap();
    assert_eq!(rm.query_rooms(xid, "Stanford").unwrap(), 0);
    assert_eq!(rm.query_cars(xid, "SFO").unwrap(), 300);
    assert_eq!(rm.query_cars_price(xid, "SFO").unwrap(), 30);
}

#[test]
fn test_crash_after_switch_keeps_new_state() {
    let (rm, dir) = setup_file_rm();
    seed_inventory(&rm);

    let xid = rm.start().unwrap();
    assert!(rm.add_rooms(xid, "Stanford", 200, 150).unwrap());
    assert!(rm.add_flight(xid, "347", 100, 620).unwrap());

    rm.crash_switches().unwrap().arm_crash_after_switch();
    assert!(matches!(
        rm.commit(xid),
        Err(ItineraryError::SimulatedCrash(CrashPoint::AfterSwitch))
    ));
    assert!(rm.is_halted());
    drop(rm);

    let rm = ResourceManager::open(file_config(&dir)).unwrap();
    let xid = rm.start().unwrap();
    assert_eq!(rm.query_rooms(xid, "Stanford").unwrap(), 200);
    assert_eq!(rm.query_rooms_price(xid, "Stanford").unwrap(), 150);
    assert_eq!(rm.query_flight(xid, "347").unwrap(), 330);
    assert_eq!(rm.query_flight_price(xid, "347").unwrap(), 620);
}

#[test]
fn test_crashed_commit_stays_active_with_its_locks() {
    let (rm, _storage) = setup_rm();
    seed_inventory(&rm);

    let xid = rm.start().unwrap();
    assert!(rm.reserve_car(xid, "John", "SFO").unwrap());
    let held = rm.lock_manager().held_keys(xid);
    assert_eq!(held, vec![ResourceKey::car("SFO"), ResourceKey::customer("John")]);

    rm.crash_switches().unwrap().arm_crash_before_switch();
    assert!(matches!(
        rm.commit(xid),
        Err(ItineraryError::SimulatedCrash(CrashPoint::BeforeSwitch))
    ));

    // Every lock holder is still accounted for as active.
    assert_eq!(rm.active_transactions(), vec![xid]);
    assert_eq!(rm.lock_manager().held_keys(xid), held);
}

#[test]
fn test_crash_switch_fires_once() {
    let (rm, storage) = setup_rm();
    let switches = rm.crash_switches().unwrap();
    switches.arm_crash_before_switch();
    assert!(switches.is_armed(CrashPoint::BeforeSwitch));

    // An empty commit reaches no crash point.
    let xid = rm.start().unwrap();
    assert_eq!(rm.commit(xid).unwrap(), CommitOutcome::NoChanges);
    assert!(switches.is_armed(CrashPoint::BeforeSwitch));

    let xid = rm.start().unwrap();
    assert!(rm.add_cars(xid, "SFO", 1, 1).unwrap());
    assert!(rm.commit(xid).is_err());
    assert!(!switches.is_armed(CrashPoint::BeforeSwitch));
    assert_eq!(storage.store_count(), 0);

    let rm = restart(&storage);
    let xid = rm.start().unwrap();
    assert!(rm.add_cars(xid, "SFO", 1, 1).unwrap());
    assert!(rm.commit(xid).is_ok());
}

#[test]
fn test_halted_manager_rejects_calls() {
    let (rm, _storage) = setup_rm();
    seed_inventory(&rm);
    let pending = rm.start().unwrap();

    rm.die_now();
    assert!(rm.is_halted());
    assert!(matches!(rm.start(), Err(ItineraryError::Halted)));
    assert!(matches!(rm.query_cars(pending, "SFO"), Err(ItineraryError::Halted)));
    assert!(matches!(rm.commit(pending), Err(ItineraryError::Halted)));
    assert!(matches!(rm.abort(pending), Err(ItineraryError::Halted)));
}

#[test]
fn test_shutdown_aborts_active_transactions() {
    let (rm, storage) = setup_rm();
    seed_inventory(&rm);

    let xid = rm.start().unwrap();
    assert!(rm.add_cars(xid, "SFO", 5, 0).unwrap());
    rm.shutdown();

    assert!(rm.is_halted());
    assert!(rm.active_transactions().is_empty());
    assert_eq!(rm.lock_manager().lock_count(), 0);

    let rm = restart(&storage);
    let xid = rm.start().unwrap();
    assert_eq!(rm.query_cars(xid, "SFO").unwrap(), 300);
}

#[test]
fn test_persist_failure_keeps_in_memory_commit() {
    let (rm, storage) = setup_rm();
    seed_inventory(&rm);

    storage.fail_stores(true);
    let xid = rm.start().unwrap();
    assert!(rm.add_cars(xid, "LAX", 20, 40).unwrap());
    assert_eq!(
        rm.commit(xid).unwrap(),
        CommitOutcome::Switched { persisted: false }
    );
    assert!(!rm.is_halted());

    // Visible in memory, but the store still holds the previous table.
    let xid = rm.start().unwrap();
    assert_eq!(rm.query_cars(xid, "LAX").unwrap(), 20);
    rm.commit(xid).unwrap();
    let stored_cars = storage.table(TableKind::Cars).unwrap();
    assert!(!stored_cars.contains_key("LAX"));

    // The next successful commit persists everything.
    storage.fail_stores(false);
    let xid = rm.start().unwrap();
    assert!(rm.add_cars(xid, "LAX", 1, 0).unwrap());
    rm.commit(xid).unwrap();
    let stored_cars = storage.table(TableKind::Cars).unwrap();
    match stored_cars.get("LAX") {
        Some(Row::Car(car)) => assert_eq!(car.num_avail, 21),
        other => panic!("unexpected stored car {:?}", other),
    }
}

#[test]
fn test_first_run_creates_marker() {
    let (_rm, storage) = setup_rm();
    assert!(storage.has_marker());
    // Nothing to load on a first run.
    assert_eq!(storage.load_count(), 0);

    let _rm = restart(&storage);
    assert_eq!(storage.load_count(), 4);
}

#[test]
fn test_missing_table_file_recovers_empty_table() {
    let (rm, dir) = setup_file_rm();
    seed_inventory(&rm);
    drop(rm);

    let config = file_config(&dir);
    assert!(config.marker_path().exists());
    fs::remove_file(config.table_path(TableKind::Hotels)).unwrap();

    let rm = ResourceManager::open(config).unwrap();
    let xid = rm.start().unwrap();
    assert_eq!(rm.query_rooms(xid, "SFO").unwrap(), 0);
    assert_eq!(rm.query_cars(xid, "SFO").unwrap(), 300);
    assert_eq!(rm.query_flight(xid, "347").unwrap(), 230);
}

#[test]
fn test_corrupt_table_file_fails_open() {
    let (rm, dir) = setup_file_rm();
    seed_inventory(&rm);
    drop(rm);

    let config = file_config(&dir);
    fs::write(config.table_path(TableKind::Cars), b"\xff\xff\xff\xff\xff\xff\xff\xff\x01").unwrap();

    match ResourceManager::open(config) {
        Err(ItineraryError::StorageError(msg)) => assert!(msg.contains("corrupt")),
        other => panic!("expected storage error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_file_storage_round_trip_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::open(file_config(&dir)).unwrap();
    assert!(!storage.marker_exists().unwrap());
    assert!(storage.load_table(TableKind::Flights).unwrap().is_none());

    let rm = ResourceManager::with_storage(Arc::new(storage.clone())).unwrap();
    assert!(storage.marker_exists().unwrap());
    seed_inventory(&rm);
    let xid = rm.start().unwrap();
    assert!(rm.reserve_flight(xid, "John", "347").unwrap());
    rm.commit(xid).unwrap();

    let customers = storage.load_table(TableKind::Customers).unwrap().unwrap();
    match customers.get("John") {
        Some(Row::Customer(customer)) => assert_eq!(customer.reservations.len(), 1),
        other => panic!("unexpected customer {:?}", other),
    }
    let flights = storage.load_table(TableKind::Flights).unwrap().unwrap();
    assert_eq!(flights.len(), 1);

    storage.clear().unwrap();
    assert!(!storage.marker_exists().unwrap());
    assert!(storage.load_table(TableKind::Customers).unwrap().is_none());
}

/// Crash hook that lets a fixed number of commits through before failing.
struct CrashAfter {
    remaining: AtomicUsize,
    point: CrashPoint,
}

impl CrashHook for CrashAfter {
    fn at(&self, point: CrashPoint) -> Result<()> {
        if point != self.point {
            return Ok(());
        }
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Err(ItineraryError::SimulatedCrash(point));
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_custom_crash_hook() {
    let storage = Arc::new(MockStorage::new());
    let hook = Arc::new(CrashAfter {
        remaining: AtomicUsize::new(1),
        point: CrashPoint::AfterSwitch,
    });
    let rm = ResourceManager::with_crash_hook(storage.clone(), hook).unwrap();
    assert!(rm.crash_switches().is_none());

    seed_inventory(&rm);
    let xid = rm.start().unwrap();
    assert!(rm.add_cars(xid, "SFO", 10, 0).unwrap());
    assert!(rm.commit(xid).is_err());

    // Persisted before the hook fired.
    let rm = restart(&storage);
    let xid = rm.start().unwrap();
    assert_eq!(rm.query_cars(xid, "SFO").unwrap(), 310);
}

#[test]
fn test_config_paths() {
    let config = ResourceManagerConfig::default();
    assert_eq!(config.marker_path(), std::path::Path::new("data/travel.db"));
    assert_eq!(
        config.table_path(TableKind::Customers),
        std::path::Path::new("data/customers.tbl")
    );

    let config = ResourceManagerConfig::with_data_dir("/var/lib/itinerary");
    assert_eq!(config.data_dir(), std::path::Path::new("/var/lib/itinerary"));
    assert_eq!(config.marker_file, "travel.db");
}
