//! Per-database connection pools.
//!
//! # Data Flow
//! ```text
//! ConfigSet
//!     → registry.rs (diff by name + (uri, access_mode) signature)
//!     → connector.rs (build lazy sqlx pool, probe with SELECT 1)
//!     → handle.rs (Active / NeedsAttention / Draining / Closed)
//!
//! Lookup:
//!     ToolRouter → PoolRegistry::get → Arc<PoolHandle> → PoolHandle::try_lease
//! ```

pub mod connector;
pub mod handle;
pub mod registry;

pub use connector::{PgConnector, PoolConnector, PoolError};
pub use handle::{DrainOutcome, PoolHandle, PoolLease, PoolState};
pub use registry::{DatabaseStatus, FailedEntry, PoolRegistry, RegistryError, ReloadReport};
