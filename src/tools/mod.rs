//! Tool routing and the built-in tools.
//!
//! # Data Flow
//! ```text
//! (tool, JSON arguments)
//!     → router.rs: look up handler, resolve `database_name` via PoolRegistry
//!     → handler precheck (no connection yet)
//!     → AccessGuard::open → GuardedConnection
//!     → handler.call under the per-call deadline
//!     → JSON payload | ToolError { error_kind, ... }
//! ```
//!
//! Analysis tools living outside this crate plug in through
//! [`ToolRouter::register`].

pub mod admin;
pub mod catalog;
pub mod error;
pub mod router;
pub mod sql;

use std::sync::Arc;

pub use error::ToolError;
pub use router::{ToolDescriptor, ToolHandler, ToolRouter, DATABASE_ARG};

/// Register every built-in tool.
pub fn register_builtin(router: &ToolRouter) {
    router.register(Arc::new(admin::ListDatabases));
    router.register(Arc::new(admin::ReloadDatabaseConfig));
    router.register(Arc::new(sql::ExecuteSql));
    router.register(Arc::new(catalog::ListSchemas));
    router.register(Arc::new(catalog::ListObjects));
    router.register(Arc::new(catalog::GetObjectDetails));
}
