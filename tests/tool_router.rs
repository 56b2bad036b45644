//! Tool dispatch without a live PostgreSQL server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{context, db, fast_settings, registry, set, uri, yaml, ScriptedConnector};
use postgres_multi_mcp::config::{AccessMode, DatabaseConfig, Settings};
use postgres_multi_mcp::guard::GuardedConnection;
use postgres_multi_mcp::pool::PoolState;
use postgres_multi_mcp::tools::{ToolError, ToolHandler};
use postgres_multi_mcp::{AppContext, HttpServer, Shutdown};
use serde_json::{json, Value};
use tempfile::TempDir;

struct Fixture {
    ctx: Arc<AppContext>,
    connector: Arc<ScriptedConnector>,
    dir: TempDir,
}

impl Fixture {
    fn config_path(&self) -> std::path::PathBuf {
        self.dir.path().join("databases.yaml")
    }

    fn write_config(&self, databases: &[DatabaseConfig]) {
        std::fs::write(self.config_path(), yaml(databases)).unwrap();
    }
}

async fn fixture_with(databases: Vec<DatabaseConfig>, settings: Settings) -> Fixture {
    let connector = ScriptedConnector::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("databases.yaml");
    std::fs::write(&path, yaml(&databases)).unwrap();
    let registry = registry(&set(databases), connector.clone()).await;
    Fixture {
        ctx: context(registry, &path, settings),
        connector,
        dir,
    }
}

async fn fixture() -> Fixture {
    fixture_with(
        vec![
            db("main", AccessMode::Unrestricted),
            db("reporting", AccessMode::Restricted).with_description("Read replica"),
        ],
        fast_settings(),
    )
    .await
}

struct Panicking;

#[async_trait]
impl ToolHandler for Panicking {
    fn name(&self) -> &'static str {
        "explode"
    }

    fn description(&self) -> &'static str {
        "Always panics"
    }

    fn requires_database(&self) -> bool {
        false
    }

    async fn call(&self, _ctx: &AppContext, _session: Option<&mut GuardedConnection>, _args: Value) -> Result<Value, ToolError> {
        panic!("handler bug");
    }
}

struct Sleeper;

#[async_trait]
impl ToolHandler for Sleeper {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn description(&self) -> &'static str {
        "Sleeps for a long time"
    }

    fn requires_database(&self) -> bool {
        false
    }

    async fn call(&self, _ctx: &AppContext, _session: Option<&mut GuardedConnection>, _args: Value) -> Result<Value, ToolError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

/// Holds a lease on `main` and never finishes.
struct Holder;

#[async_trait]
impl ToolHandler for Holder {
    fn name(&self) -> &'static str {
        "hold"
    }

    fn description(&self) -> &'static str {
        "Holds a lease on main"
    }

    fn requires_database(&self) -> bool {
        false
    }

    async fn call(&self, ctx: &AppContext, _session: Option<&mut GuardedConnection>, _args: Value) -> Result<Value, ToolError> {
        let handle = ctx.registry().get("main")?;
        let _lease = handle.try_lease();
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn test_list_databases_reports_every_entry() {
    let fx = fixture().await;

    let result = fx.ctx.call_tool("list_databases", json!({})).await.unwrap();

    let entries = result.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "main");
    assert_eq!(entries[0]["access_mode"], "unrestricted");
    assert_eq!(entries[0]["state"], "active");
    assert_eq!(entries[1]["name"], "reporting");
    assert_eq!(entries[1]["description"], "Read replica");
    assert_eq!(entries[1]["access_mode"], "restricted");
}

#[tokio::test]
async fn test_unknown_database_is_not_found() {
    let fx = fixture().await;

    let err = fx
        .ctx
        .call_tool("execute_sql", json!({ "database_name": "nope", "sql": "SELECT 1" }))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "not_found");
    let payload = err.to_payload();
    assert_eq!(payload["error_kind"], "not_found");
    assert_eq!(payload["database_name"], "nope");
    assert_eq!(payload["available"], json!(["main", "reporting"]));
}

#[tokio::test]
async fn test_restricted_write_is_denied_without_a_connection() {
    let fx = fixture().await;

    let err = fx
        .ctx
        .call_tool(
            "execute_sql",
            json!({ "database_name": "reporting", "sql": "DROP TABLE users" }),
        )
        .await
        .unwrap_err();

    match err {
        ToolError::AccessDenied {
            database_name,
            statement_summary,
            ..
        } => {
            assert_eq!(database_name, "reporting");
            assert_eq!(statement_summary, "DROP TABLE users");
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }
    let handle = fx.ctx.registry().get("reporting").unwrap();
    assert_eq!(handle.pool().size(), 0);
    assert_eq!(handle.in_flight(), 0);
}

#[tokio::test]
async fn test_unreachable_database_is_unavailable() {
    let fx = fixture().await;

    let err = fx
        .ctx
        .call_tool("execute_sql", json!({ "database_name": "main", "sql": "SELECT 1" }))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "unavailable");
    assert_eq!(fx.ctx.registry().get("main").unwrap().in_flight(), 0);
}

#[tokio::test]
async fn test_needs_attention_database_is_unavailable() {
    let connector = ScriptedConnector::new();
    connector.fail(&uri("flaky"));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("databases.yaml");
    let databases = vec![db("main", AccessMode::Restricted), db("flaky", AccessMode::Restricted)];
    std::fs::write(&path, yaml(&databases)).unwrap();
    let ctx = context(registry(&set(databases), connector).await, &path, fast_settings());

    let err = ctx
        .call_tool("list_schemas", json!({ "database_name": "flaky" }))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "unavailable");
}

#[tokio::test]
async fn test_unknown_tool() {
    let fx = fixture().await;

    let err = fx.ctx.call_tool("drop_everything", Value::Null).await.unwrap_err();

    assert_eq!(
        err,
        ToolError::UnknownTool {
            tool: "drop_everything".to_string()
        }
    );
}

#[tokio::test]
async fn test_invalid_arguments() {
    let fx = fixture().await;

    let missing = fx
        .ctx
        .call_tool("execute_sql", json!({ "sql": "SELECT 1" }))
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), "invalid_arguments");

    let extra = fx
        .ctx
        .call_tool(
            "execute_sql",
            json!({ "database_name": "main", "sql": "SELECT 1", "limit": 5 }),
        )
        .await
        .unwrap_err();
    assert_eq!(extra.kind(), "invalid_arguments");

    let not_object = fx.ctx.call_tool("list_databases", json!([1, 2])).await.unwrap_err();
    assert_eq!(not_object.kind(), "invalid_arguments");

    let bad_type = fx
        .ctx
        .call_tool(
            "list_objects",
            json!({ "database_name": "main", "schema_name": "public", "object_type": "index" }),
        )
        .await
        .unwrap_err();
    assert_eq!(bad_type.kind(), "invalid_arguments");
}

#[tokio::test]
async fn test_panicking_tool_is_contained() {
    let fx = fixture().await;
    fx.ctx.router().register(Arc::new(Panicking));

    let err = fx.ctx.call_tool("explode", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "execution");

    // The router keeps serving.
    assert!(fx.ctx.call_tool("list_databases", json!({})).await.is_ok());
}

#[tokio::test]
async fn test_call_deadline() {
    let mut settings = fast_settings();
    settings.tools.call_timeout = Duration::from_millis(100);
    let fx = fixture_with(vec![db("main", AccessMode::Restricted)], settings).await;
    fx.ctx.router().register(Arc::new(Sleeper));

    let err = fx.ctx.call_tool("sleep", json!({})).await.unwrap_err();

    match err {
        ToolError::Timeout { scope, timeout_ms, .. } => {
            assert_eq!(scope, "call");
            assert_eq!(timeout_ms, 100);
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_call_deadline_releases_work_before_returning() {
    let mut settings = fast_settings();
    settings.tools.call_timeout = Duration::from_millis(100);
    let fx = fixture_with(vec![db("main", AccessMode::Unrestricted)], settings).await;
    fx.ctx.router().register(Arc::new(Holder));
    let handle = fx.ctx.registry().get("main").unwrap();

    let err = fx.ctx.call_tool("hold", json!({})).await.unwrap_err();

    assert_eq!(err.kind(), "timeout");
    assert_eq!(handle.in_flight(), 0);
}

#[tokio::test]
async fn test_reload_tool_applies_file_changes() {
    let fx = fixture().await;
    fx.write_config(&[
        db("main", AccessMode::Unrestricted),
        db("archive", AccessMode::Restricted),
    ]);

    let result = fx.ctx.call_tool("reload_database_config", json!({})).await.unwrap();

    assert_eq!(result["added"], json!(["archive"]));
    assert_eq!(result["removed"], json!(["reporting"]));
    assert_eq!(result["unchanged"], json!(["main"]));
    assert_eq!(result["generation"], 1);
    assert!(fx.ctx.registry().get("archive").is_ok());
    assert!(fx.ctx.registry().get("reporting").is_err());
    assert_eq!(fx.connector.builds(), 3);
}

#[tokio::test]
async fn test_reload_tool_rejects_invalid_file() {
    let fx = fixture().await;
    std::fs::write(
        fx.config_path(),
        "databases:\n  - name: a\n    uri: postgres://x@h/a\n    access_mode: sometimes\n",
    )
    .unwrap();

    let err = fx
        .ctx
        .call_tool("reload_database_config", json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "config");
    assert_eq!(fx.ctx.registry().list().len(), 2);
    assert_eq!(fx.ctx.registry().generation(), 0);
}

#[tokio::test]
async fn test_reload_retires_database_mid_session() {
    let fx = fixture().await;
    let handle = fx.ctx.registry().get("reporting").unwrap();
    fx.write_config(&[db("main", AccessMode::Unrestricted)]);

    fx.ctx.reload().await.unwrap();
    fx.ctx.registry().wait_for_drains().await;

    assert_eq!(handle.state(), PoolState::Closed);
    let err = fx
        .ctx
        .call_tool("list_schemas", json!({ "database_name": "reporting" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_http_surface() {
    let fx = fixture().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());
    let server = tokio::spawn(HttpServer::new(fx.ctx.clone()).run(listener, shutdown.wait()));

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["active"], 2);

    let response = client
        .post(format!("{base}/tools/execute_sql"))
        .json(&json!({ "database_name": "reporting", "sql": "DELETE FROM t" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["error_kind"], "access_denied");

    let response = client
        .post(format!("{base}/tools/list_databases"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let tools: Value = client
        .get(format!("{base}/tools"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<_> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "execute_sql",
            "get_object_details",
            "list_databases",
            "list_objects",
            "list_schemas",
            "reload_database_config",
        ]
    );

    shutdown.trigger();
    server.await.unwrap().unwrap();
}
