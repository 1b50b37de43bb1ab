/// Entity rows stored in the tables.
pub mod entity;
/// Table kinds and row addresses.
pub mod resource_key;
/// Immutable committed table snapshots.
pub mod snapshot;
