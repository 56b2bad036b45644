//! Periodic database health probing.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::HealthCheckConfig;
use crate::context::AppContext;
use crate::pool::PoolState;

pub struct HealthMonitor {
    ctx: Arc<AppContext>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(ctx: Arc<AppContext>, config: HealthCheckConfig) -> Self {
        Self { ctx, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Database health checks disabled");
            return;
        }

        tracing::info!(interval = ?self.config.interval, "Health monitor starting");

        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The registry probed everything at load; skip the immediate tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every Active or NeedsAttention handle once.
    pub async fn check_all(&self) -> CheckSummary {
        let registry = self.ctx.registry();
        let handles: Vec<_> = registry
            .handles()
            .into_iter()
            .filter(|h| matches!(h.state(), PoolState::Active | PoolState::NeedsAttention))
            .collect();

        let results = join_all(handles.iter().map(|h| async move {
            let was_attention = h.state() == PoolState::NeedsAttention;
            let result = registry.probe(h).await;
            (h, was_attention, result)
        }))
        .await;

        let mut summary = CheckSummary::default();
        for (handle, was_attention, result) in results {
            match result {
                Ok(()) => {
                    summary.healthy += 1;
                    if was_attention && handle.is_active() {
                        summary.recovered.push(handle.name().to_string());
                    }
                }
                Err(e) => {
                    summary.failing.push(handle.name().to_string());
                    tracing::warn!(database = %handle.name(), error = %e, "Health check failed");
                }
            }
            crate::observability::metrics::record_pool_state(handle.name(), handle.state());
        }
        summary
    }
}

/// Result of one probing round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub healthy: usize,
    pub failing: Vec<String>,
    pub recovered: Vec<String>,
}

impl CheckSummary {
    pub fn probed(&self) -> usize {
        self.healthy + self.failing.len()
    }
}
