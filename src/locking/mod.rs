/// Shared/exclusive lock table with blocking acquisition.
pub mod manager;
/// Wait-for graph used to detect deadlocks.
pub mod wait_for;
