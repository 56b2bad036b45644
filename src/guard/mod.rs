//! Access-mode enforcement.
//!
//! # Data Flow
//! ```text
//! Arc<PoolHandle> + SQL
//!     → classify.rs (advisory: reject recognizable writes, restricted only)
//!     → session.rs (lease handle, acquire connection)
//!         restricted:   BEGIN; SET TRANSACTION READ ONLY; SET LOCAL statement_timeout
//!         unrestricted: plain pooled connection
//!     → QueryOutput | GuardError
//! ```
//!
//! # Design Decisions
//! - The read-only transaction is the authoritative layer; the classifier is
//!   an early rejection that never takes a connection
//! - Connections and leases are released by drop, so cancellation cannot leak them

pub mod classify;
pub mod session;

pub use classify::{check_read_only, summarize, Rejection};
pub use session::{AccessGuard, GuardError, GuardedConnection, QueryOutput};
