//! `execute_sql`: run arbitrary SQL under the database's access policy.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::AccessMode;
use crate::context::AppContext;
use crate::guard::{self, GuardError, GuardedConnection};
use crate::pool::PoolHandle;
use crate::tools::error::ToolError;
use crate::tools::router::{parse_args, require_session, ToolHandler};

const NAME: &str = "execute_sql";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecuteSqlArgs {
    #[serde(rename = "database_name")]
    _database_name: String,
    sql: String,
}

pub struct ExecuteSql;

#[async_trait]
impl ToolHandler for ExecuteSql {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Execute SQL against the named database. Restricted databases only accept read-only statements"
    }

    /// Restricted statements are classified before a connection is taken.
    fn precheck(&self, args: &Value, handle: &PoolHandle) -> Result<(), ToolError> {
        let args: ExecuteSqlArgs = parse_args(NAME, args.clone())?;
        if handle.access_mode() == AccessMode::Restricted {
            guard::check_read_only(&args.sql).map_err(|r| {
                ToolError::from(GuardError::AccessDenied {
                    database: handle.name().to_string(),
                    reason: r.to_string(),
                    statement_summary: r.statement_summary,
                })
            })?;
        }
        Ok(())
    }

    async fn call(
        &self,
        _ctx: &AppContext,
        session: Option<&mut GuardedConnection>,
        args: Value,
    ) -> Result<Value, ToolError> {
        let args: ExecuteSqlArgs = parse_args(NAME, args)?;
        let session = require_session(NAME, session)?;
        let output = session.query(&args.sql).await?;
        serde_json::to_value(output).map_err(|e| ToolError::Execution {
            database_name: Some(session.database().to_string()),
            reason: e.to_string(),
        })
    }
}
