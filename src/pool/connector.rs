//! Pool construction and connectivity probing.
//!
//! [`PoolConnector`] is the seam between the registry and PostgreSQL: the
//! registry decides *when* pools are built and probed, the connector decides
//! *how*. [`PgConnector`] is the production implementation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use thiserror::Error;
use url::Url;

use crate::config::{DatabaseConfig, PoolSettings};

/// Idle connections are recycled after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Failure scoped to a single database entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid connection string for `{name}`: {reason}")]
    InvalidUri { name: String, reason: String },

    #[error("failed to connect to `{name}`: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("health check failed for `{name}`: {reason}")]
    HealthCheckFailed { name: String, reason: String },
}

/// Builds pools and checks that they can reach their database.
#[async_trait]
pub trait PoolConnector: Send + Sync + fmt::Debug {
    /// Create a pool without opening any connection.
    fn build(&self, config: &DatabaseConfig, settings: &PoolSettings) -> Result<PgPool, PoolError>;

    /// Verify connectivity within `timeout`.
    async fn probe(
        &self,
        config: &DatabaseConfig,
        pool: &PgPool,
        timeout: Duration,
    ) -> Result<(), PoolError>;
}

/// Connector backed by `sqlx` lazy pools and a `SELECT 1` probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl PoolConnector for PgConnector {
    fn build(&self, config: &DatabaseConfig, settings: &PoolSettings) -> Result<PgPool, PoolError> {
        build_lazy_pool(config, settings)
    }

    async fn probe(
        &self,
        config: &DatabaseConfig,
        pool: &PgPool,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let probe = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool);
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(PoolError::ConnectFailed {
                name: config.name.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(PoolError::HealthCheckFailed {
                name: config.name.clone(),
                reason: format!("probe timed out after {timeout:?}"),
            }),
        }
    }
}

/// Build a bounded pool that connects on first use.
pub fn build_lazy_pool(config: &DatabaseConfig, settings: &PoolSettings) -> Result<PgPool, PoolError> {
    let options = PgConnectOptions::from_str(&config.uri).map_err(|e| PoolError::InvalidUri {
        name: config.name.clone(),
        reason: e.to_string(),
    })?;

    Ok(PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(0)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options))
}

/// Mask the password of a connection string for logging.
pub fn redact_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "<unparseable uri>".to_string(),
    }
}
