//! # tidemark-core
//!
//! Configuration and logging shared by the tidemark migration crates.

pub mod config;
pub mod logging;

pub use config::{
    ConfigError, ConfigSource, ConfigValidator, MigratorConfig, ModuleConfig, TransactionMode,
    DEFAULT_STATE_COLLECTION,
};
pub use logging::{init_logging, LoggingConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
