use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::config::ResourceManagerConfig;
use crate::data_store::entity::{Car, Customer, Flight, Hotel, Inventory, Reservation, ReservationKind, Row};
use crate::data_store::resource_key::{ResourceKey, TableKind};
use crate::data_store::snapshot::Snapshot;
use crate::errors::{ItineraryError, Result};
use crate::file_storage::FileStorage;
use crate::locking::manager::{LockManager, LockMode};
use crate::shadow::{CommitOutcome, CrashHook, CrashSwitches, ShadowCommitter};
use crate::storage::Storage;
use crate::transaction::{Transaction, TransactionHandle, TransactionRegistry};
use crate::workspace::{Workspace, WorkspaceLookup};

/// Itinerary Prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::data_store::entity::*;
    pub use crate::data_store::resource_key::*;
    pub use crate::data_store::snapshot::*;
    pub use crate::errors::*;
    pub use crate::file_storage::*;
    pub use crate::locking::manager::*;
    pub use crate::resource_manager::*;
    pub use crate::shadow::*;
    pub use crate::storage::*;
    pub use crate::workspace::*;
}

/// A row as seen by one transaction: its own staged changes over the
/// committed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveRow {
    Present(Row),
    /// Deleted by this transaction.
    Deleted,
    Absent,
}

impl EffectiveRow {
    pub fn into_present(self) -> Option<Row> {
        match self {
            EffectiveRow::Present(row) => Some(row),
            EffectiveRow::Deleted | EffectiveRow::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, EffectiveRow::Present(_))
    }
}

/// Quantity change applied through the shared inventory path.
#[derive(Debug, Clone, Copy)]
struct Adjustment {
    total: i64,
    available: i64,
    price: i64,
    /// Whether an absent or deleted row is started from scratch.
    create: bool,
}

impl Adjustment {
    fn add(count: i64, price: i64) -> Self {
        Self {
            total: count,
            available: count,
            price,
            create: true,
        }
    }

    fn remove(count: i64) -> Self {
        Self {
            total: -count,
            available: -count,
            price: 0,
            create: false,
        }
    }

    /// Gives one reserved unit back.
    fn unreserve() -> Self {
        Self {
            total: 0,
            available: 1,
            price: 0,
            create: false,
        }
    }
}

/// The transactional resource manager for flights, hotels, cars and
/// customers.
///
/// Every operation runs under a transaction obtained from
/// [`ResourceManager::start`]. Reads take READ locks and writes take WRITE
/// locks on the touched rows; all locks are held until
/// [`ResourceManager::commit`] or [`ResourceManager::abort`]. Changes are
/// staged in the transaction's workspace and become visible to others only
/// once committed.
///
/// Business-rule failures (unknown rows, insufficient availability, empty
/// identifiers) are reported as `Ok(false)` or `Ok(0)`. A transaction that
/// runs into a deadlock is aborted and the call fails with
/// [`ItineraryError::TransactionAborted`].
///
/// # Examples
///
/// ```no_run
/// use itinerary::prelude::*;
///
/// let rm = ResourceManager::open(ResourceManagerConfig::with_data_dir("/tmp/itinerary"))?;
///
/// let xid = rm.start()?;
/// rm.add_cars(xid, "SFO", 300, 30)?;
/// rm.commit(xid)?;
///
/// let xid = rm.start()?;
/// assert!(rm.reserve_car(xid, "John", "SFO")?);
/// rm.commit(xid)?;
/// # Ok::<(), ItineraryError>(())
/// ```
pub struct ResourceManager {
    lock_manager: LockManager,
    transactions: TransactionRegistry,
    committer: ShadowCommitter,
    crash_switches: Option<Arc<CrashSwitches>>,
    halted: AtomicBool,
}

impl ResourceManager {
    /// Opens (or initialises) the file-backed database described by `config`.
    pub fn open(config: ResourceManagerConfig) -> Result<Self> {
        info!("Opening resource manager in {}", config.data_dir().display());
        let storage = Arc::new(FileStorage::open(config)?);
        Self::with_storage(storage)
    }

    /// Recovers from `storage`, with [`CrashSwitches`] as the crash hook.
    pub fn with_storage(storage: Arc<dyn Storage>) -> Result<Self> {
        let switches = Arc::new(CrashSwitches::new());
        let hook: Arc<dyn CrashHook> = switches.clone();
        let committer = ShadowCommitter::recover(storage, hook)?;
        Ok(Self::assemble(committer, Some(switches)))
    }

    /// Recovers from `storage` with a caller-supplied crash hook.
    pub fn with_crash_hook(storage: Arc<dyn Storage>, hook: Arc<dyn CrashHook>) -> Result<Self> {
        let committer = ShadowCommitter::recover(storage, hook)?;
        Ok(Self::assemble(committer, None))
    }

    fn assemble(committer: ShadowCommitter, crash_switches: Option<Arc<CrashSwitches>>) -> Self {
        Self {
            lock_manager: LockManager::new(),
            transactions: TransactionRegistry::new(),
            committer,
            crash_switches,
            halted: AtomicBool::new(false),
        }
    }

    // ---------------------------------------------------------------------
    // Transaction lifecycle
    // ---------------------------------------------------------------------

    /// Starts a new transaction and returns its identifier.
    ///
    /// Identifiers start at 1 and increase monotonically.
    pub fn start(&self) -> Result<u64> {
        self.ensure_running()?;
        let xid = self.transactions.begin();
        info!("Tx {} started", xid);
        Ok(xid)
    }

    /// Commits `xid`: its workspace becomes the committed state, then its
    /// locks are released.
    ///
    /// # Errors
    ///
    /// * [`ItineraryError::TransactionAborted`] / [`ItineraryError::InvalidTransaction`]
    ///   if `xid` is not active.
    /// * [`ItineraryError::InvalidTransaction`] if a commit of `xid` is
    ///   already under way.
    /// * [`ItineraryError::SimulatedCrash`] if a crash point fired. The
    ///   resource manager halts with `xid` still active; reopen it on the
    ///   same storage to recover.
    pub fn commit(&self, xid: u64) -> Result<CommitOutcome> {
        self.ensure_running()?;
        let handle = self.transactions.begin_commit(xid)?;
        let txn = handle.lock();
        // An operation still in flight may have hit a deadlock meanwhile.
        if self.transactions.is_aborted(xid) {
            return Err(ItineraryError::TransactionAborted(xid));
        }

        let outcome = match self.committer.commit(xid, txn.workspace()) {
            Ok(outcome) => outcome,
            Err(e) => {
                // Still active and still holding its locks.
                self.halt(&format!("Tx {} commit failed: {}", xid, e));
                return Err(e);
            }
        };

        self.lock_manager.unlock_all(xid);
        self.transactions.finish_commit(xid);
        info!("Tx {} committed ({:?})", xid, outcome);
        Ok(outcome)
    }

    /// Aborts `xid`, discarding its workspace and releasing its locks.
    pub fn abort(&self, xid: u64) -> Result<()> {
        self.ensure_running()?;
        let handle = self.transactions.abort(xid)?;
        self.lock_manager.unlock_all(xid);
        // An operation still running for this transaction owns the handle;
        // its workspace goes away with the last reference.
        if let Some(mut txn) = handle.try_lock() {
            txn.discard();
        }
        info!("Tx {} aborted", xid);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Flights
    // ---------------------------------------------------------------------

    /// Adds `num_seats` seats to a flight, creating it if needed. A positive
    /// `price` replaces the current seat price.
    pub fn add_flight(&self, xid: u64, flight_num: &str, num_seats: i64, price: i64) -> Result<bool> {
        self.add_inventory::<Flight>(xid, flight_num, num_seats, price)
    }

    /// Deletes a flight. Fails if the flight does not exist or if any
    /// customer still holds a reservation on it.
    pub fn delete_flight(&self, xid: u64, flight_num: &str) -> Result<bool> {
        let handle = self.transaction(xid)?;
        if flight_num.is_empty() {
            return Ok(false);
        }
        let key = ResourceKey::flight(flight_num);
        let mut txn = handle.lock();
        self.acquire(xid, &key, LockMode::Write)?;

        if !self.effective_row(txn.workspace(), &key).is_present() {
            return Ok(false);
        }
        if self.is_reserved(txn.workspace(), ReservationKind::Flight, flight_num) {
            debug!("Tx {} cannot delete {}: reserved", xid, key);
            return Ok(false);
        }
        txn.workspace_mut().record_delete(key);
        Ok(true)
    }

    pub fn query_flight(&self, xid: u64, flight_num: &str) -> Result<i64> {
        self.query_inventory::<Flight>(xid, flight_num, Flight::available)
    }

    pub fn query_flight_price(&self, xid: u64, flight_num: &str) -> Result<i64> {
        self.query_inventory::<Flight>(xid, flight_num, Flight::price)
    }

    // ---------------------------------------------------------------------
    // Hotels
    // ---------------------------------------------------------------------

    pub fn add_rooms(&self, xid: u64, location: &str, num_rooms: i64, price: i64) -> Result<bool> {
        self.add_inventory::<Hotel>(xid, location, num_rooms, price)
    }

    /// Removes `num_rooms` rooms. Fails if the hotel does not exist or fewer
    /// than `num_rooms` rooms are available.
    pub fn delete_rooms(&self, xid: u64, location: &str, num_rooms: i64) -> Result<bool> {
        self.remove_inventory::<Hotel>(xid, location, num_rooms)
    }

    pub fn query_rooms(&self, xid: u64, location: &str) -> Result<i64> {
        self.query_inventory::<Hotel>(xid, location, Hotel::available)
    }

    pub fn query_rooms_price(&self, xid: u64, location: &str) -> Result<i64> {
        self.query_inventory::<Hotel>(xid, location, Hotel::price)
    }

    // ---------------------------------------------------------------------
    // Cars
    // ---------------------------------------------------------------------

    pub fn add_cars(&self, xid: u64, location: &str, num_cars: i64, price: i64) -> Result<bool> {
        self.add_inventory::<Car>(xid, location, num_cars, price)
    }

    pub fn delete_cars(&self, xid: u64, location: &str, num_cars: i64) -> Result<bool> {
        self.remove_inventory::<Car>(xid, location, num_cars)
    }

    pub fn query_cars(&self, xid: u64, location: &str) -> Result<i64> {
        self.query_inventory::<Car>(xid, location, Car::available)
    }

    pub fn query_cars_price(&self, xid: u64, location: &str) -> Result<i64> {
        self.query_inventory::<Car>(xid, location, Car::price)
    }

    // ---------------------------------------------------------------------
    // Customers
    // ---------------------------------------------------------------------

    /// Creates a customer with no reservations. Succeeds without change if
    /// the customer already exists.
    pub fn new_customer(&self, xid: u64, name: &str) -> Result<bool> {
        let handle = self.transaction(xid)?;
        if name.is_empty() {
            return Ok(false);
        }
        let key = ResourceKey::customer(name);
        let mut txn = handle.lock();
        self.acquire(xid, &key, LockMode::Write)?;

        if !self.effective_row(txn.workspace(), &key).is_present() {
            txn.workspace_mut()
                .record_update(key, Row::Customer(Customer::new(name)));
        }
        Ok(true)
    }

    /// Deletes a customer after giving every reserved unit back to its
    /// flight, hotel or car.
    ///
    /// Reserved rows are locked one by one after the customer. A deadlock on
    /// any of them aborts the whole transaction.
    pub fn delete_customer(&self, xid: u64, name: &str) -> Result<bool> {
        let handle = self.transaction(xid)?;
        if name.is_empty() {
            return Ok(false);
        }
        let key = ResourceKey::customer(name);
        let mut txn = handle.lock();
        self.acquire(xid, &key, LockMode::Write)?;

        let customer = match self.effective_row(txn.workspace(), &key) {
            EffectiveRow::Present(Row::Customer(customer)) => customer,
            _ => return Ok(false),
        };

        for reservation in &customer.reservations {
            let item_key = reservation.resource_key();
            self.acquire(xid, &item_key, LockMode::Write)?;
            if !self.unreserve(&mut txn, reservation) {
                debug!("Tx {} found nothing to give back to {}", xid, item_key);
            }
        }

        txn.workspace_mut().record_delete(key);
        debug!(
            "Tx {} deleted customer {} and released {} reservations",
            xid,
            name,
            customer.reservations.len()
        );
        Ok(true)
    }

    /// Total price of every reservation the customer holds, at the current
    /// price of each reserved row.
    pub fn query_customer_bill(&self, xid: u64, name: &str) -> Result<i64> {
        let handle = self.transaction(xid)?;
        if name.is_empty() {
            return Ok(0);
        }
        let key = ResourceKey::customer(name);
        let txn = handle.lock();
        self.acquire(xid, &key, LockMode::Read)?;

        let customer = match self.effective_row(txn.workspace(), &key) {
            EffectiveRow::Present(Row::Customer(customer)) => customer,
            _ => return Ok(0),
        };

        let mut bill: i64 = 0;
        for reservation in &customer.reservations {
            let item_key = reservation.resource_key();
            self.acquire(xid, &item_key, LockMode::Read)?;
            let price = match self.effective_row(txn.workspace(), &item_key).into_present() {
                Some(Row::Flight(f)) => f.price,
                Some(Row::Hotel(h)) => h.price,
                Some(Row::Car(c)) => c.price,
                _ => 0,
            };
            bill = i64::saturating_add(bill, price);
        }
        Ok(bill)
    }

    // ---------------------------------------------------------------------
    // Reservations
    // ---------------------------------------------------------------------

    /// Reserves one seat on `flight_num` for `customer`, creating the
    /// customer if needed.
    pub fn reserve_flight(&self, xid: u64, customer: &str, flight_num: &str) -> Result<bool> {
        self.reserve::<Flight>(xid, customer, flight_num)
    }

    pub fn reserve_room(&self, xid: u64, customer: &str, location: &str) -> Result<bool> {
        self.reserve::<Hotel>(xid, customer, location)
    }

    pub fn reserve_car(&self, xid: u64, customer: &str, location: &str) -> Result<bool> {
        self.reserve::<Car>(xid, customer, location)
    }

    // ---------------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------------

    /// Aborts every active transaction and halts.
    pub fn shutdown(&self) {
        let active = self.transactions.active_ids();
        for xid in &active {
            if self.transactions.mark_aborted(*xid).is_some() {
                self.lock_manager.unlock_all(*xid);
            }
        }
        info!("Shutting down with {} active transactions aborted", active.len());
        self.halt("shutdown");
    }

    /// Halts immediately, as if the process had died.
    pub fn die_now(&self) {
        self.halt("die now");
    }

    /// The crash switches, unless a custom hook was supplied at open time.
    pub fn crash_switches(&self) -> Option<&CrashSwitches> {
        self.crash_switches.as_deref()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// The committed tables. Holds no locks: the result may be stale as soon
    /// as it is returned.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.committer.snapshot()
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn active_transactions(&self) -> Vec<u64> {
        self.transactions.active_ids()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn ensure_running(&self) -> Result<()> {
        if self.is_halted() {
            return Err(ItineraryError::Halted);
        }
        Ok(())
    }

    fn halt(&self, reason: &str) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            self.lock_manager.shutdown();
            warn!("Resource manager halted: {}", reason);
        }
    }

    fn transaction(&self, xid: u64) -> Result<TransactionHandle> {
        self.ensure_running()?;
        self.transactions.get(xid)
    }

    /// Locks `key` for `xid`, turning a deadlock into an abort of `xid`.
    fn acquire(&self, xid: u64, key: &ResourceKey, mode: LockMode) -> Result<()> {
        match self.lock_manager.lock(xid, key, mode) {
            Ok(_) => {
                if self.transactions.is_aborted(xid) {
                    // Aborted by another caller while this request waited.
                    self.lock_manager.unlock_all(xid);
                    return Err(ItineraryError::TransactionAborted(xid));
                }
                Ok(())
            }
            Err(ItineraryError::Deadlock { .. }) => {
                self.lock_manager.unlock_all(xid);
                self.transactions.mark_aborted(xid);
                warn!("Tx {} aborted: deadlock waiting for {} on {}", xid, mode, key);
                Err(ItineraryError::TransactionAborted(xid))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves `key` through the workspace, then the committed snapshot.
    fn effective_row(&self, workspace: &Workspace, key: &ResourceKey) -> EffectiveRow {
        match workspace.lookup(key) {
            WorkspaceLookup::Staged(row) => EffectiveRow::Present(row.clone()),
            WorkspaceLookup::Deleted => EffectiveRow::Deleted,
            WorkspaceLookup::Untouched => match self.committer.snapshot().get(key) {
                Some(row) => EffectiveRow::Present(row.clone()),
                None => EffectiveRow::Absent,
            },
        }
    }

    fn committed_inventory<T: Inventory>(&self, key: &ResourceKey) -> Option<T> {
        self.committer
            .snapshot()
            .get(key)
            .and_then(|row| T::from_row(row).cloned())
    }

    fn effective_inventory<T: Inventory>(&self, workspace: &Workspace, key: &ResourceKey) -> Option<T> {
        self.effective_row(workspace, key)
            .into_present()
            .and_then(|row| T::from_row(&row).cloned())
    }

    /// Whether any customer visible to this transaction holds a reservation
    /// of `kind` on `resource_id`.
    ///
    /// Customers are scanned without locks. The caller holds the WRITE lock
    /// on the reserved row, and every reservation of it also locks that row,
    /// so no uncommitted reservation by another transaction can exist.
    fn is_reserved(&self, workspace: &Workspace, kind: ReservationKind, resource_id: &str) -> bool {
        let staged = workspace
            .updates()
            .filter_map(|(_, row)| row.as_customer())
            .any(|customer| customer.holds(kind, resource_id));
        if staged {
            return true;
        }

        let snapshot = self.committer.snapshot();
        snapshot
            .table(TableKind::Customers)
            .iter()
            .any(|(name, row)| {
                let key = ResourceKey::customer(name);
                !workspace.is_updated(&key)
                    && !workspace.is_deleted(&key)
                    && row
                        .as_customer()
                        .is_some_and(|customer| customer.holds(kind, resource_id))
            })
    }

    fn add_inventory<T: Inventory>(&self, xid: u64, id: &str, count: i64, price: i64) -> Result<bool> {
        self.change_inventory::<T>(xid, id, Adjustment::add(count, price))
    }

    fn remove_inventory<T: Inventory>(&self, xid: u64, id: &str, count: i64) -> Result<bool> {
        if count < 0 {
            self.transaction(xid)?;
            return Ok(false);
        }
        self.change_inventory::<T>(xid, id, Adjustment::remove(count))
    }

    fn change_inventory<T: Inventory>(&self, xid: u64, id: &str, adjustment: Adjustment) -> Result<bool> {
        let handle = self.transaction(xid)?;
        if id.is_empty() {
            return Ok(false);
        }
        let key = ResourceKey::new(T::TABLE, id);
        let mut txn = handle.lock();
        self.acquire(xid, &key, LockMode::Write)?;
        Ok(self.adjust_inventory::<T>(&mut txn, &key, adjustment))
    }

    /// The one quantity-changing path for every inventory kind. The caller
    /// holds the WRITE lock on `key`.
    fn adjust_inventory<T: Inventory>(
        &self,
        txn: &mut Transaction,
        key: &ResourceKey,
        adjustment: Adjustment,
    ) -> bool {
        let mut item = match self.effective_inventory::<T>(txn.workspace(), key) {
            Some(item) => item,
            // Un-deleting resumes from the committed row, if there is one.
            None if adjustment.create => self
                .committed_inventory::<T>(key)
                .unwrap_or_else(|| T::fresh(key.id())),
            None => return false,
        };

        let (Some(total), Some(available)) = (
            item.total().checked_add(adjustment.total),
            item.available().checked_add(adjustment.available),
        ) else {
            debug!("Tx {} cannot change {} by {}: overflow", txn.id(), key, adjustment.available);
            return false;
        };
        if available < 0 {
            debug!(
                "Tx {} cannot change {} by {}: {} available",
                txn.id(),
                key,
                adjustment.available,
                item.available()
            );
            return false;
        }

        item.set_total(total);
        item.set_available(available);
        item.apply_price(adjustment.price);
        txn.workspace_mut().record_update(key.clone(), item.into_row());
        true
    }

    fn unreserve(&self, txn: &mut Transaction, reservation: &Reservation) -> bool {
        let key = reservation.resource_key();
        match reservation.kind {
            ReservationKind::Flight => self.adjust_inventory::<Flight>(txn, &key, Adjustment::unreserve()),
            ReservationKind::Room => self.adjust_inventory::<Hotel>(txn, &key, Adjustment::unreserve()),
            ReservationKind::Car => self.adjust_inventory::<Car>(txn, &key, Adjustment::unreserve()),
        }
    }

    fn query_inventory<T: Inventory>(&self, xid: u64, id: &str, field: fn(&T) -> i64) -> Result<i64> {
        let handle = self.transaction(xid)?;
        if id.is_empty() {
            return Ok(0);
        }
        let key = ResourceKey::new(T::TABLE, id);
        let txn = handle.lock();
        self.acquire(xid, &key, LockMode::Read)?;
        Ok(self
            .effective_inventory::<T>(txn.workspace(), &key)
            .map_or(0, |item| field(&item)))
    }

    fn reserve<T: Inventory>(&self, xid: u64, customer: &str, id: &str) -> Result<bool> {
        let handle = self.transaction(xid)?;
        if customer.is_empty() || id.is_empty() {
            return Ok(false);
        }
        let item_key = ResourceKey::new(T::TABLE, id);
        let customer_key = ResourceKey::customer(customer);
        let mut txn = handle.lock();

        let mut keys = [&item_key, &customer_key];
        keys.sort();
        for key in keys {
            self.acquire(xid, key, LockMode::Write)?;
        }

        let mut item = match self.effective_inventory::<T>(txn.workspace(), &item_key) {
            Some(item) if item.available() >= 1 => item,
            _ => {
                debug!("Tx {} cannot reserve {}: not available", xid, item_key);
                return Ok(false);
            }
        };
        let mut holder = match self.effective_row(txn.workspace(), &customer_key) {
            EffectiveRow::Present(Row::Customer(existing)) => existing,
            _ => Customer::new(customer),
        };

        item.set_available(item.available() - 1);
        holder.reservations.push(Reservation::new(T::RESERVATION, id));

        let workspace = txn.workspace_mut();
        workspace.record_update(item_key, item.into_row());
        workspace.record_update(customer_key, Row::Customer(holder));
        Ok(true)
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("halted", &self.is_halted())
            .field("active", &self.transactions.active_count())
            .field("lock_manager", &self.lock_manager)
            .finish()
    }
}
