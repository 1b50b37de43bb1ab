use std::fmt;

use serde::{Deserialize, Serialize};

/// The four committed tables.
///
/// The declaration order is the fixed order in which multi-key operations
/// acquire their locks, so inventory rows are always locked before customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableKind {
    Flights,
    Cars,
    Hotels,
    Customers,
}

impl TableKind {
    /// Every table, in lock order.
    pub const ALL: [TableKind; 4] = [
        TableKind::Flights,
        TableKind::Cars,
        TableKind::Hotels,
        TableKind::Customers,
    ];

    /// The prefix used both for resource keys and for table file names.
    pub fn prefix(self) -> &'static str {
        match self {
            TableKind::Flights => "flights",
            TableKind::Cars => "cars",
            TableKind::Hotels => "hotels",
            TableKind::Customers => "customers",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            TableKind::Flights => 0,
            TableKind::Cars => 1,
            TableKind::Hotels => 2,
            TableKind::Customers => 3,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Address of one row: the table it lives in plus its identifier.
///
/// Used as the unit of locking and as the key of a transaction's workspace.
/// Renders as the table prefix followed by the identifier, e.g. `carsSFO`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    kind: TableKind,
    id: String,
}

impl ResourceKey {
    pub fn new(kind: TableKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn flight(flight_num: &str) -> Self {
        Self::new(TableKind::Flights, flight_num)
    }

    pub fn car(location: &str) -> Self {
        Self::new(TableKind::Cars, location)
    }

    pub fn hotel(location: &str) -> Self {
        Self::new(TableKind::Hotels, location)
    }

    pub fn customer(name: &str) -> Self {
        Self::new(TableKind::Customers, name)
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.id)
    }
}
