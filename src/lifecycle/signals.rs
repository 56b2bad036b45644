//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM / Ctrl-C → trigger graceful shutdown
//! - SIGHUP → reload the database configuration in place
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A failed reload is logged and the current databases stay in service

use std::sync::Arc;

use crate::context::AppContext;
use crate::lifecycle::shutdown::Shutdown;

/// Run until a termination signal arrives, reloading on SIGHUP.
#[cfg(unix)]
pub async fn listen(ctx: Arc<AppContext>, shutdown: Arc<Shutdown>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, reloading database configuration");
                if let Ok(report) = ctx.reload().await {
                    tracing::info!(
                        generation = report.generation,
                        failed = report.failed.len(),
                        "SIGHUP reload finished"
                    );
                }
            }
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                shutdown.trigger();
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, shutting down");
                shutdown.trigger();
                break;
            }
            _ = stop.recv() => break,
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn listen(_ctx: Arc<AppContext>, shutdown: Arc<Shutdown>) -> std::io::Result<()> {
    let mut stop = shutdown.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupt received, shutting down");
            shutdown.trigger();
        }
        _ = stop.recv() => {}
    }
    Ok(())
}
