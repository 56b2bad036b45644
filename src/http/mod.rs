//! HTTP tool surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, request id, tracing, timeout)
//!     → AppContext::call_tool / PoolRegistry::list / AppContext::reload
//!     → JSON response
//! ```
//!
//! Exposes the tool operations over plain JSON for local clients and
//! `pgmcp-cli`.

pub mod server;

pub use server::{HttpServer, X_REQUEST_ID};
