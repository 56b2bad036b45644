//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! databases.yaml (or .toml)
//!     → loader.rs (resolve source, parse into RawConfigFile)
//!     → validation.rs (strict typing, all errors collected)
//!     → LoadedConfig { settings, databases: ConfigSet }
//!
//! On reload (tool call, SIGHUP or watcher.rs):
//!     loader.rs loads new config
//!     → validation.rs validates
//!     → PoolRegistry::reload diffs the new ConfigSet by name
//! ```
//!
//! # Design Decisions
//! - Loose input never reaches the pool layer; unknown fields are rejected
//! - Ambient settings are read once at startup; reload only touches databases
//! - All settings have defaults to allow minimal configs

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{ConfigError, ConfigLoader};
pub use schema::{
    AccessMode, ConfigSet, ConfigSignature, DatabaseConfig, LoadedConfig, PoolSettings, Settings,
};
pub use validation::ValidationError;
