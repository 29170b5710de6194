//! Document Backend Abstractions
//!
//! The migration engine talks to the database only through the traits in
//! [`core`]. Two implementations ship with the crate: an in-process
//! [`memory`] backend and, behind the `mongodb` feature, a MongoDB adapter.

pub mod core;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use self::core::*;
pub use memory::{FailPoint, MemoryClient};
#[cfg(feature = "mongodb")]
pub use mongo::MongoClient;

/// Result alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by a document backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Duplicate key '{key}' in collection '{collection}'")]
    DuplicateKey { collection: String, key: String },

    #[error("Session was not created by the {expected} backend")]
    ForeignSession { expected: &'static str },

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Serialization(err.to_string())
    }
}
