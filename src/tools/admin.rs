//! Tools that act on the registry itself rather than on one database.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::AppContext;
use crate::guard::GuardedConnection;
use crate::tools::error::ToolError;
use crate::tools::router::ToolHandler;

/// `list_databases`: every configured database with its state.
pub struct ListDatabases;

#[async_trait]
impl ToolHandler for ListDatabases {
    fn name(&self) -> &'static str {
        "list_databases"
    }

    fn description(&self) -> &'static str {
        "List all configured databases with their access mode and connection status"
    }

    fn requires_database(&self) -> bool {
        false
    }

    async fn call(
        &self,
        ctx: &AppContext,
        _session: Option<&mut GuardedConnection>,
        _args: Value,
    ) -> Result<Value, ToolError> {
        serde_json::to_value(ctx.registry().list()).map_err(|e| ToolError::Execution {
            database_name: None,
            reason: e.to_string(),
        })
    }
}

/// `reload_database_config`: re-read the configuration file and apply it.
pub struct ReloadDatabaseConfig;

#[async_trait]
impl ToolHandler for ReloadDatabaseConfig {
    fn name(&self) -> &'static str {
        "reload_database_config"
    }

    fn description(&self) -> &'static str {
        "Reload database configurations from the configuration file without restarting"
    }

    fn requires_database(&self) -> bool {
        false
    }

    async fn call(
        &self,
        ctx: &AppContext,
        _session: Option<&mut GuardedConnection>,
        _args: Value,
    ) -> Result<Value, ToolError> {
        let report = ctx.reload().await?;
        Ok(json!({
            "added": report.added,
            "removed": report.removed,
            "changed": report.changed,
            "unchanged": report.unchanged,
            "failed": report.failed,
            "generation": report.generation,
        }))
    }
}
