//! # tidemark-migrate: Migration Engine
//!
//! Applies an ordered catalog of migrations to a document database, one
//! transaction per migration, and records every attempt in a state
//! collection. A Running or Failure record blocks further runs in its
//! namespace until an operator resolves it.
//!
//! The engine reaches the database only through the traits in [`backends`].

pub mod backends;
pub mod error;
pub mod migrations;
pub mod transaction;

pub use backends::{
    Document, DocumentClient, DocumentCollection, DocumentDatabase, DocumentSession, DriverError,
    DriverResult, FailPoint, Filter, FindOptions, MemoryClient, SortOrder,
};
#[cfg(feature = "mongodb")]
pub use backends::MongoClient;
pub use error::{CatalogError, MigrateError, MigrateResult};
pub use migrations::*;
pub use transaction::TransactionalSession;
