use std::fmt;
use std::sync::Arc;

use ahash::AHashMap as HashMap;

use crate::data_store::entity::Row;
use crate::data_store::resource_key::{ResourceKey, TableKind};
use crate::workspace::Workspace;

/// One table: entity identifier to row.
pub type Table = HashMap<String, Row>;

/// An immutable view of the four committed tables.
///
/// Each table sits behind its own `Arc`, so building the next snapshot only
/// copies the tables a transaction actually touched.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    tables: [Arc<Table>; 4],
}

impl Snapshot {
    /// Creates an empty snapshot with four empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembles a snapshot from tables loaded by recovery.
    pub fn from_tables(tables: [Table; 4]) -> Self {
        Self {
            tables: tables.map(Arc::new),
        }
    }

    pub fn table(&self, kind: TableKind) -> &Arc<Table> {
        &self.tables[kind.index()]
    }

    /// Retrieves the committed row for `key`, if any.
    pub fn get(&self, key: &ResourceKey) -> Option<&Row> {
        self.table(key.kind()).get(key.id())
    }

    /// Number of rows across all tables.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the successor snapshot: copies of the touched tables with the
    /// workspace's upserts applied, then its deletes.
    pub fn apply(&self, workspace: &Workspace) -> Snapshot {
        let mut next = self.clone();

        for (key, row) in workspace.updates() {
            let table = Arc::make_mut(&mut next.tables[key.kind().index()]);
            table.insert(key.id().to_string(), row.clone());
        }

        for key in workspace.deletes() {
            let table = Arc::make_mut(&mut next.tables[key.kind().index()]);
            table.remove(key.id());
        }

        next
    }

    /// Whether `self` and `other` share the same allocation for `kind`.
    pub fn shares_table(&self, other: &Snapshot, kind: TableKind) -> bool {
        Arc::ptr_eq(self.table(kind), other.table(kind))
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in TableKind::ALL {
            writeln!(f, "## {}", kind)?;
            let table = self.table(kind);
            if table.is_empty() {
                writeln!(f, "  (empty)")?;
                continue;
            }
            let mut rows: Vec<&Row> = table.values().collect();
            rows.sort_by(|a, b| a.id().cmp(b.id()));
            for row in rows {
                writeln!(f, "  {}", row)?;
            }
        }
        Ok(())
    }
}
