//! Multi-database PostgreSQL pool manager for tool-calling clients.

pub mod config;
pub mod context;
pub mod guard;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod tools;

pub use config::{ConfigLoader, LoadedConfig, Settings};
pub use context::AppContext;
pub use http::HttpServer;
pub use lifecycle::shutdown::Shutdown;
pub use pool::{PgConnector, PoolRegistry};
pub use tools::{ToolError, ToolRouter};
