//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (monitor.rs)
//!     → Probe every handle in the current registry snapshot
//!     → Active: refresh `connected` / `last_error`
//!     → NeedsAttention: promote to Active once the probe succeeds
//! ```
//!
//! # Design Decisions
//! - Probes run concurrently, each bounded by `pool.probe_timeout`
//! - A failing Active database keeps serving; the driver reports the errors
//! - Draining and Closed handles are never probed

pub mod monitor;
