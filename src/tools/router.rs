//! Tool dispatch.
//!
//! # Responsibilities
//! - Keep the set of registered tools
//! - Resolve a call's `database_name` against the registry
//! - Open a guarded session and run the handler under the per-call deadline
//! - Turn every failure, including a panicking handler, into a [`ToolError`]
//!
//! # Design Decisions
//! - Each call runs in its own task so a panic is contained by `JoinError`
//! - The deadline covers acquisition and execution; on expiry the task is
//!   aborted and awaited, so its session is rolled back and released before
//!   the timeout is reported
//! - Dropping the dispatch future aborts the call as well

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::task::AbortHandle;

use crate::context::AppContext;
use crate::guard::GuardedConnection;
use crate::observability::metrics;
use crate::pool::PoolHandle;
use crate::tools::error::ToolError;

/// Argument every database tool takes.
pub const DATABASE_ARG: &str = "database_name";

/// A tool callable through the router.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether the call targets one database through `database_name`.
    fn requires_database(&self) -> bool {
        true
    }

    /// Checks that need no connection. Runs after the database is resolved
    /// and before a session is opened.
    fn precheck(&self, _args: &Value, _handle: &PoolHandle) -> Result<(), ToolError> {
        Ok(())
    }

    /// Run the tool. `session` is `Some` exactly when the tool requires a database.
    async fn call(
        &self,
        ctx: &AppContext,
        session: Option<&mut GuardedConnection>,
        args: Value,
    ) -> Result<Value, ToolError>;
}

/// What `list()` reports about a registered tool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub requires_database: bool,
}

/// Registry of tools keyed by name.
#[derive(Default)]
pub struct ToolRouter {
    tools: DashMap<&'static str, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        f.debug_struct("ToolRouter").field("tools", &names).finish()
    }
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a tool under its name.
    pub fn register(&self, tool: Arc<dyn ToolHandler>) {
        if self.tools.insert(tool.name(), tool.clone()).is_some() {
            tracing::warn!(tool = tool.name(), "Replaced an existing tool registration");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tools sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<_> = self
            .tools
            .iter()
            .map(|entry| ToolDescriptor {
                name: entry.name(),
                description: entry.description(),
                requires_database: entry.requires_database(),
            })
            .collect();
        tools.sort_by_key(|t| t.name);
        tools
    }

    /// Dispatch one call.
    pub async fn dispatch(
        &self,
        ctx: Arc<AppContext>,
        tool: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        let started = Instant::now();
        let result = self.run(ctx, tool, args).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_tool_call(tool, outcome, started.elapsed());
        match &result {
            Ok(_) => tracing::debug!(tool, elapsed = ?started.elapsed(), "Tool call completed"),
            Err(e) => tracing::info!(tool, error_kind = e.kind(), error = %e, "Tool call failed"),
        }
        result
    }

    async fn run(&self, ctx: Arc<AppContext>, tool: &str, args: Value) -> Result<Value, ToolError> {
        let handler = self
            .tools
            .get(tool)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ToolError::UnknownTool {
                tool: tool.to_string(),
            })?;

        let args = match args {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => args,
            other => {
                return Err(ToolError::invalid_arguments(
                    tool,
                    format!("expected a JSON object, got {other}"),
                ))
            }
        };

        let handle = if handler.requires_database() {
            let name = args
                .get(DATABASE_ARG)
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::invalid_arguments(tool, "missing string field `database_name`"))?;
            let handle = ctx.registry().get(name)?;
            handler.precheck(&args, &handle)?;
            Some(handle)
        } else {
            None
        };

        let deadline = ctx.settings().tools.call_timeout;
        let database = handle.as_ref().map(|h| h.name().to_string());
        let mut task = tokio::spawn(run_handler(ctx, handler, handle, args));
        let _abort = AbortOnDrop(task.abort_handle());

        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                tracing::error!(tool, database = ?database, "Tool handler panicked");
                Err(ToolError::Execution {
                    database_name: database,
                    reason: format!("tool `{tool}` failed unexpectedly"),
                })
            }
            Ok(Err(join_err)) => Err(ToolError::Execution {
                database_name: database,
                reason: join_err.to_string(),
            }),
            Err(_) => {
                tracing::warn!(tool, database = ?database, deadline = ?deadline, "Tool call deadline exceeded");
                // Session and lease are released before the timeout is reported.
                task.abort();
                let _ = task.await;
                Err(ToolError::Timeout {
                    database_name: database,
                    statement_summary: None,
                    scope: "call",
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }
}

async fn run_handler(
    ctx: Arc<AppContext>,
    handler: Arc<dyn ToolHandler>,
    handle: Option<Arc<PoolHandle>>,
    args: Value,
) -> Result<Value, ToolError> {
    let mut session = match handle {
        Some(handle) => Some(ctx.guard().open(&handle).await?),
        None => None,
    };
    let result = handler.call(&ctx, session.as_mut(), args).await;
    if let Some(session) = session {
        session.finish().await;
    }
    result
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The session of a database tool.
pub fn require_session<'a>(
    tool: &str,
    session: Option<&'a mut GuardedConnection>,
) -> Result<&'a mut GuardedConnection, ToolError> {
    session.ok_or_else(|| ToolError::Execution {
        database_name: None,
        reason: format!("tool `{tool}` was called without a database session"),
    })
}

/// Deserialize tool arguments, mapping failures to `invalid_arguments`.
pub fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid_arguments(tool, e))
}
