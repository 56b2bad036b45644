//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Resolve config → Validate → Init logging/metrics → Load registry
//!     → Spawn monitor, watcher, signal listener → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop serving → Close every pool (bounded grace) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Reload database configuration
//! ```
//!
//! # Design Decisions
//! - Only an unusable configuration or zero usable databases abort startup
//! - Pools are closed last, after the listener stops accepting calls

pub mod shutdown;
pub mod signals;
