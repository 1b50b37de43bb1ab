use thiserror::Error;

use crate::data_store::resource_key::ResourceKey;
use crate::shadow::CrashPoint;

#[derive(Error, Debug)]
pub enum ItineraryError {
    #[error("Invalid transaction identifier: {0}")]
    InvalidTransaction(u64),

    #[error("Transaction {0} was aborted")]
    TransactionAborted(u64),

    #[error("Deadlock detected for transaction {txn_id} while waiting on {key}")]
    Deadlock { txn_id: u64, key: ResourceKey },

    #[error("Simulated crash at {0}")]
    SimulatedCrash(CrashPoint),

    #[error("Resource manager has halted")]
    Halted,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<bincode::Error> for ItineraryError {
    fn from(err: bincode::Error) -> Self {
        ItineraryError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ItineraryError>;
