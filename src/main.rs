//! postgres-multi-mcp
//!
//! Serves several PostgreSQL databases, each with its own pool and access
//! policy, to tool-calling clients.
//!
//! # Architecture Overview
//!
//! ```text
//!   databases.yaml ──▶ ConfigLoader ──▶ PoolRegistry (ArcSwap snapshot)
//!        ▲                                   │  name → PoolHandle (sqlx pool)
//!        │ watcher / SIGHUP / tool           ▼
//!        └──────────── reload ────────  ToolRouter ──▶ AccessGuard ──▶ PostgreSQL
//!                                            ▲
//!   HTTP (axum) ── POST /tools/{tool} ───────┘
//!
//!   Cross-cutting: health monitor, tracing, metrics, shutdown/signals
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use postgres_multi_mcp::config::watcher::ConfigWatcher;
use postgres_multi_mcp::health::monitor::HealthMonitor;
use postgres_multi_mcp::lifecycle::signals;
use postgres_multi_mcp::observability::{logging, metrics};
use postgres_multi_mcp::{AppContext, ConfigLoader, HttpServer, PgConnector, Shutdown};

#[derive(Parser)]
#[command(name = "postgres-multi-mcp", version)]
#[command(about = "Multi-database PostgreSQL server for tool-calling clients", long_about = None)]
struct Cli {
    /// Configuration file; overrides DATABASES_CONFIG_PATH and the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the HTTP tool surface; overrides `server.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Watch the configuration file and reload on change
    #[arg(long)]
    watch: bool,

    /// Load the configuration, probe every database, print the result and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loader = ConfigLoader::new(cli.config);
    let loaded = match loader.load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("postgres-multi-mcp: {e}");
            std::process::exit(2);
        }
    };
    let settings = loaded.settings.clone();

    logging::init_logging(&settings.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %loaded.source.display(),
        databases = loaded.databases.len(),
        "Configuration loaded"
    );

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let source = loaded.source.clone();
    let ctx = match AppContext::bootstrap(loaded, loader, Arc::new(PgConnector)).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    };

    if cli.check {
        println!("{}", serde_json::to_string_pretty(&ctx.registry().list())?);
        ctx.shutdown().await;
        return Ok(());
    }

    let shutdown = Arc::new(Shutdown::new());

    let monitor = HealthMonitor::new(ctx.clone(), settings.health_check.clone());
    tokio::spawn(monitor.run(shutdown.subscribe()));

    {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = signals::listen(ctx, shutdown).await {
                tracing::error!(error = %e, "Failed to install signal handlers");
            }
        });
    }

    // Kept alive until main returns.
    let _watcher = if cli.watch || settings.server.watch_config {
        let (watcher, mut updates) = ConfigWatcher::new(&source);
        let watcher = watcher.run()?;
        let ctx = ctx.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(config) => {
                            ctx.registry().reload(&config.databases).await;
                        }
                        None => break,
                    },
                    _ = stop.recv() => break,
                }
            }
        });
        Some(watcher)
    } else {
        None
    };

    let bind = cli.bind.unwrap_or_else(|| settings.server.bind_address.clone());
    let listener = TcpListener::bind(&bind).await?;
    HttpServer::new(ctx.clone())
        .run(listener, shutdown.wait())
        .await?;

    shutdown.trigger();
    ctx.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
