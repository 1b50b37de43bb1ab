use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::data_store::resource_key::TableKind;
use crate::data_store::snapshot::{Snapshot, Table};
use crate::errors::{ItineraryError, Result};
use crate::storage::Storage;
use crate::workspace::Workspace;

/// The two injectable failure windows of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// New snapshots are built but neither switched in nor persisted.
    BeforeSwitch,
    /// New snapshots are switched in and persisted.
    AfterSwitch,
}

impl fmt::Display for CrashPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashPoint::BeforeSwitch => write!(f, "before pointer switch"),
            CrashPoint::AfterSwitch => write!(f, "after pointer switch"),
        }
    }
}

/// Fault-injection hook consulted at each [`CrashPoint`] of a commit.
///
/// Returning an error stops the commit right there; the resource manager
/// treats that as the process dying and halts.
pub trait CrashHook: Send + Sync {
    fn at(&self, point: CrashPoint) -> Result<()>;
}

/// Default [`CrashHook`]: two switches a test harness can arm.
///
/// An armed switch fires on the next commit that reaches its point, then
/// disarms itself.
#[derive(Debug, Default)]
pub struct CrashSwitches {
    before_switch: AtomicBool,
    after_switch: AtomicBool,
}

impl CrashSwitches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm_crash_before_switch(&self) {
        self.before_switch.store(true, Ordering::SeqCst);
    }

    pub fn arm_crash_after_switch(&self) {
        self.after_switch.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self, point: CrashPoint) -> bool {
        self.flag(point).load(Ordering::SeqCst)
    }

    fn flag(&self, point: CrashPoint) -> &AtomicBool {
        match point {
            CrashPoint::BeforeSwitch => &self.before_switch,
            CrashPoint::AfterSwitch => &self.after_switch,
        }
    }
}

impl CrashHook for CrashSwitches {
    fn at(&self, point: CrashPoint) -> Result<()> {
        if self.flag(point).swap(false, Ordering::SeqCst) {
            warn!("Crash switch fired {}", point);
            return Err(ItineraryError::SimulatedCrash(point));
        }
        Ok(())
    }
}

/// Result of a successful shadow commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The workspace was empty; nothing was built or written.
    NoChanges,
    /// New snapshots were switched in. `persisted` is false when at least one
    /// table could not be written.
    Switched { persisted: bool },
}

/// Owner of the committed snapshot and of the commit protocol.
///
/// Commits run one at a time: building the next snapshot from the current
/// one, switching it in, and persisting it happen inside a single critical
/// section. Readers only clone the current `Arc<Snapshot>` and never wait
/// on that section.
pub struct ShadowCommitter {
    committed: RwLock<Arc<Snapshot>>,
    commit_section: Mutex<()>,
    storage: Arc<dyn Storage>,
    crash_hook: Arc<dyn CrashHook>,
}

impl ShadowCommitter {
    /// Recovers the committed state from `storage`.
    ///
    /// Without a marker the database is new: four empty tables are used and
    /// the marker is written. With a marker every table is loaded on its own
    /// and a missing table file counts as an empty table.
    pub fn recover(storage: Arc<dyn Storage>, crash_hook: Arc<dyn CrashHook>) -> Result<Self> {
        let snapshot = if storage.marker_exists()? {
            let mut tables: [Table; 4] = Default::default();
            for kind in TableKind::ALL {
                if let Some(table) = storage.load_table(kind)? {
                    tables[kind.index()] = table;
                }
            }
            let snapshot = Snapshot::from_tables(tables);
            info!("Recovered {} committed rows", snapshot.len());
            snapshot
        } else {
            storage.create_marker()?;
            info!("Initialised empty database");
            Snapshot::new()
        };

        Ok(Self {
            committed: RwLock::new(Arc::new(snapshot)),
            commit_section: Mutex::new(()),
            storage,
            crash_hook,
        })
    }

    /// The current committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.committed.read())
    }

    /// Makes the changes in `workspace` the committed state.
    ///
    /// # Errors
    ///
    /// Returns [`ItineraryError::SimulatedCrash`] if the crash hook fires. At
    /// [`CrashPoint::BeforeSwitch`] the committed state is untouched; at
    /// [`CrashPoint::AfterSwitch`] it has been switched and persisted.
    /// Failures to persist are logged and reported through
    /// [`CommitOutcome::Switched`], not as errors: the switch is never undone.
    pub fn commit(&self, txn_id: u64, workspace: &Workspace) -> Result<CommitOutcome> {
        let _section = self.commit_section.lock();

        if workspace.is_empty() {
            debug!("Tx {} commit: nothing to apply", txn_id);
            return Ok(CommitOutcome::NoChanges);
        }

        let current = self.snapshot();
        let next = Arc::new(current.apply(workspace));
        debug!(
            "Tx {} commit: built snapshot with {} staged keys",
            txn_id,
            workspace.len()
        );

        self.crash_hook.at(CrashPoint::BeforeSwitch)?;

        *self.committed.write() = Arc::clone(&next);
        debug!("Tx {} commit: snapshot switched in", txn_id);

        let persisted = self.persist(&next);

        self.crash_hook.at(CrashPoint::AfterSwitch)?;

        Ok(CommitOutcome::Switched { persisted })
    }

    fn persist(&self, snapshot: &Snapshot) -> bool {
        let mut persisted = true;
        for kind in TableKind::ALL {
            if let Err(e) = self.storage.store_table(kind, snapshot.table(kind)) {
                warn!("Failed to persist table {}: {}", kind, e);
                persisted = false;
            }
        }
        persisted
    }
}
