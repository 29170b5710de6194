pub mod migrator_config;
pub mod sources;
pub mod validation;

pub use migrator_config::*;
pub use sources::*;
pub use validation::*;
