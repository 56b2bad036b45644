//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pgmcp_tool_calls_total` (counter): tool calls by tool, outcome
//! - `pgmcp_tool_call_duration_seconds` (histogram): tool call latency
//! - `pgmcp_reloads_total` (counter): reloads by outcome
//! - `pgmcp_pool_state` (gauge): per database, 0=active 1=needs_attention 2=draining 3=closed
//! - `pgmcp_pool_drains_total` (counter): retired pools by graceful/forced
//!
//! # Design Decisions
//! - Recording through the `metrics` facade is a no-op until a recorder exists
//! - The Prometheus listener is only started when enabled in configuration

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::pool::handle::{DrainOutcome, PoolState};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_tool_call(tool: &str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(
        "pgmcp_tool_calls_total",
        "tool" => tool.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("pgmcp_tool_call_duration_seconds", "tool" => tool.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_reload(outcome: &'static str) {
    metrics::counter!("pgmcp_reloads_total", "outcome" => outcome).increment(1);
}

pub fn record_pool_state(database: &str, state: PoolState) {
    metrics::gauge!("pgmcp_pool_state", "database" => database.to_string())
        .set(state as u8 as f64);
}

pub fn record_drain(database: &str, outcome: DrainOutcome) {
    let label = match outcome {
        DrainOutcome::Graceful => "graceful",
        DrainOutcome::Forced { .. } => "forced",
    };
    metrics::counter!(
        "pgmcp_pool_drains_total",
        "database" => database.to_string(),
        "outcome" => label
    )
    .increment(1);
}
