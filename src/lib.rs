//! Transactional resource manager for travel inventory.
//!
//! Flights, hotels, cars and customers live in four committed tables.
//! Concurrent transactions read and change them under strict two-phase
//! locking with deadlock detection; each transaction stages its changes in a
//! private workspace, and commit switches in new table snapshots and persists
//! them (shadow paging). Two crash points in the commit path can be armed to
//! test recovery.
//!
//! Start with [`ResourceManager`] and the [`prelude`].

pub mod config;
pub mod data_store;
pub mod errors;
pub mod file_storage;
pub mod locking;
pub mod resource_manager;
pub mod shadow;
pub mod storage;
pub mod transaction;
pub mod workspace;

// Re-export key types and structs for easier access
pub use config::ResourceManagerConfig;
pub use data_store::entity::{Car, Customer, Flight, Hotel, Inventory, Reservation, ReservationKind, Row};
pub use data_store::resource_key::{ResourceKey, TableKind};
pub use data_store::snapshot::{Snapshot, Table};
pub use errors::{ItineraryError, Result};
pub use file_storage::FileStorage;
pub use locking::manager::{LockGrant, LockManager, LockMode};
pub use resource_manager::{EffectiveRow, ResourceManager, prelude};
pub use shadow::{CommitOutcome, CrashHook, CrashPoint, CrashSwitches};
pub use storage::Storage;
pub use workspace::Workspace;
