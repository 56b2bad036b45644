//! Application context shared by every request.
//!
//! The registry is built once at startup and owned here; handlers receive the
//! context explicitly instead of reaching for a process-wide singleton.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{ConfigError, ConfigLoader, LoadedConfig, Settings};
use crate::guard::AccessGuard;
use crate::pool::{PoolConnector, PoolRegistry, RegistryError, ReloadReport};
use crate::tools::{self, ToolError, ToolRouter};

#[derive(Debug)]
pub struct AppContext {
    registry: PoolRegistry,
    guard: AccessGuard,
    loader: ConfigLoader,
    settings: Settings,
    router: ToolRouter,
}

impl AppContext {
    /// Assemble a context around an already loaded registry, with the
    /// built-in tools registered.
    pub fn new(registry: PoolRegistry, loader: ConfigLoader, settings: Settings) -> Arc<Self> {
        let router = ToolRouter::new();
        tools::register_builtin(&router);
        Arc::new(Self {
            guard: AccessGuard::new(settings.access.statement_timeout),
            registry,
            loader,
            settings,
            router,
        })
    }

    /// Load the pool registry from `config` and assemble the context.
    pub async fn bootstrap(
        config: LoadedConfig,
        loader: ConfigLoader,
        connector: Arc<dyn PoolConnector>,
    ) -> Result<Arc<Self>, RegistryError> {
        let registry =
            PoolRegistry::load(&config.databases, config.settings.pool.clone(), connector).await?;
        Ok(Self::new(registry, loader, config.settings))
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn loader(&self) -> &ConfigLoader {
        &self.loader
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    /// Dispatch a tool call through the router.
    pub async fn call_tool(self: &Arc<Self>, tool: &str, args: Value) -> Result<Value, ToolError> {
        self.router.dispatch(self.clone(), tool, args).await
    }

    /// Re-read the configuration source and apply its database set.
    pub async fn reload(&self) -> Result<ReloadReport, ConfigError> {
        self.registry.reload_from(&self.loader).await
    }

    /// Close every pool.
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
    }
}
