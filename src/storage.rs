use crate::data_store::resource_key::TableKind;
use crate::data_store::snapshot::Table;
use crate::errors::Result;

/// Trait for the persistence layer that holds the committed tables.
///
/// The resource manager stores every committed table after each commit and
/// loads them back during recovery. Implementations persist each table
/// independently; they hold no transaction logic. A marker records that the
/// database has been initialised, so recovery can tell a first run from a
/// run whose table files are simply missing.
///
/// Implementations must be `Send` and `Sync` to be used concurrently by multiple
/// transactions.
///
/// # Examples
///
/// An in-memory implementation might look like this:
///
/// ```no_run
/// use itinerary::prelude::*;
/// use ahash::AHashMap as HashMap;
/// use parking_lot::Mutex;
///
/// #[derive(Default)]
/// struct MemoryStorage {
///     tables: Mutex<HashMap<TableKind, Table>>,
///     marker: Mutex<bool>,
/// }
///
/// impl Storage for MemoryStorage {
///     fn load_table(&self, kind: TableKind) -> Result<Option<Table>> {
///         Ok(self.tables.lock().get(&kind).cloned())
///     }
///
///     fn store_table(&self, kind: TableKind, table: &Table) -> Result<()> {
///         self.tables.lock().insert(kind, table.clone());
///         Ok(())
///     }
///
///     fn marker_exists(&self) -> Result<bool> {
///         Ok(*self.marker.lock())
///     }
///
///     fn create_marker(&self) -> Result<()> {
///         *self.marker.lock() = true;
///         Ok(())
///     }
/// }
/// ```
pub trait Storage: Send + Sync {
    /// Loads a committed table, or `None` if it was never stored.
    ///
    /// # Errors
    ///
    /// Returns a `ItineraryError::StorageError` or `SerializationError` if a
    /// stored table exists but cannot be read back.
    fn load_table(&self, kind: TableKind) -> Result<Option<Table>>;

    /// Durably replaces the stored copy of a table.
    ///
    /// Must not return `Ok` before the table would survive a crash.
    fn store_table(&self, kind: TableKind, table: &Table) -> Result<()>;

    /// Whether the database marker exists.
    fn marker_exists(&self) -> Result<bool>;

    /// Creates the (empty) database marker.
    fn create_marker(&self) -> Result<()>;
}
