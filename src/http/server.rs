//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router for the tool surface
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve until the shutdown future resolves
//!
//! # Routes
//! - `GET /health`: liveness plus registry generation
//! - `GET /databases`: `list_databases`
//! - `POST /reload`: `reload_database_config`
//! - `GET /tools`: registered tools
//! - `POST /tools/{tool}`: dispatch with the JSON body as arguments
//!
//! Tool failures are part of the tool result and answer 200 with the
//! structured error; non-2xx statuses are reserved for HTTP-level problems.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::context::AppContext;
use crate::pool::{DatabaseStatus, PoolState};
use crate::tools::ToolDescriptor;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Slack on top of the per-call deadline before the HTTP layer gives up.
const TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let timeout = ctx.settings().tools.call_timeout + TIMEOUT_SLACK;
        let router = Self::build_router(AppState { ctx }, timeout);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState, timeout: Duration) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .route("/health", get(health))
            .route("/databases", get(list_databases))
            .route("/reload", post(reload))
            .route("/tools", get(list_tools))
            .route("/tools/{tool}", post(call_tool))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(TimeoutLayer::new(timeout)),
            )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    version: &'static str,
    generation: u64,
    active: usize,
    needs_attention: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let databases = state.ctx.registry().list();
    let count = |s: PoolState| databases.iter().filter(|d| d.state == s).count();
    let active = count(PoolState::Active);
    let needs_attention = count(PoolState::NeedsAttention);
    Json(HealthStatus {
        status: if needs_attention == 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        generation: state.ctx.registry().generation(),
        active,
        needs_attention,
    })
}

async fn list_databases(State(state): State<AppState>) -> Json<Vec<DatabaseStatus>> {
    Json(state.ctx.registry().list())
}

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.ctx.router().list())
}

async fn reload(State(state): State<AppState>) -> Response {
    match state.ctx.reload().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error_kind": "config", "message": e.to_string() })),
        )
            .into_response(),
    }
}

async fn call_tool(State(state): State<AppState>, Path(tool): Path<String>, body: Bytes) -> Response {
    let args = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(args) => args,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error_kind": "invalid_arguments", "message": e.to_string() })),
                )
                    .into_response()
            }
        }
    };

    match state.ctx.call_tool(&tool, args).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(e) => Json(json!({ "error": e.to_payload() })).into_response(),
    }
}
