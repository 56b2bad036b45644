//! Policy-enforcing sessions over a pool handle.
//!
//! # Responsibilities
//! - Lease the handle so a drain can wait for this work
//! - Restricted: read-only transaction with a statement timeout, classification
//!   before anything is sent
//! - Unrestricted: plain pooled connection, no extra policy
//! - Map driver errors to access/timeout/database failures
//!
//! # Design Decisions
//! - Restricted work always ends in a rollback; the transaction is dropped
//!   (and rolled back by `sqlx`) on every exit path, including cancellation
//! - Forced interruption of a retired handle races every query

use std::ops::DerefMut;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::TryStreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Either, Executor, Postgres, Row, Transaction, TypeInfo};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AccessMode;
use crate::guard::classify::{self, Rejection};
use crate::pool::{PoolHandle, PoolLease};

const SQLSTATE_QUERY_CANCELED: &str = "57014";
const SQLSTATE_READ_ONLY_TRANSACTION: &str = "25006";

/// Grace the client-side bound gives the server's own statement timeout.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("access denied on `{database}`: {reason}")]
    AccessDenied {
        database: String,
        statement_summary: String,
        reason: String,
    },

    #[error("statement on `{database}` exceeded the {timeout:?} timeout")]
    Timeout {
        database: String,
        statement_summary: String,
        timeout: Duration,
    },

    #[error("database `{database}` is no longer accepting work")]
    Retired { database: String },

    #[error("work on `{database}` was interrupted while its pool was retired")]
    Interrupted { database: String },

    #[error("could not acquire a connection to `{database}`: {reason}")]
    Acquire { database: String, reason: String },

    #[error("invalid query parameters: {reason}")]
    InvalidParameters { reason: String },

    #[error("query on `{database}` failed: {message}")]
    Database {
        database: String,
        code: Option<String>,
        message: String,
    },
}

/// Rows and counts returned by a statement batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub rows_affected: u64,
}

/// Applies each database's access policy to SQL execution.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    statement_timeout: Duration,
}

impl AccessGuard {
    pub fn new(statement_timeout: Duration) -> Self {
        Self { statement_timeout }
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Run one SQL batch under the handle's policy.
    ///
    /// A restricted statement the classifier rejects never takes a connection.
    pub async fn execute(&self, handle: &Arc<PoolHandle>, sql: &str) -> Result<QueryOutput, GuardError> {
        if handle.access_mode() == AccessMode::Restricted {
            classify::check_read_only(sql).map_err(|r| denied(handle.name(), r))?;
        }
        let mut conn = self.open(handle).await?;
        let result = conn.query(sql).await;
        conn.finish().await;
        result
    }

    /// Open a session for a tool to run several statements on.
    pub async fn open(&self, handle: &Arc<PoolHandle>) -> Result<GuardedConnection, GuardError> {
        let database = handle.name().to_string();
        let lease = handle.try_lease().ok_or_else(|| GuardError::Retired {
            database: database.clone(),
        })?;
        let interrupt = handle.interrupt_token();

        let db = database.as_str();
        let pool = handle.pool().clone();

        let session = match handle.access_mode() {
            AccessMode::Restricted => {
                let mut tx = interruptible(
                    &interrupt,
                    db,
                    Box::pin(async move { pool.begin().await.map_err(|e| acquire_error(db, e)) }),
                )
                .await?;
                let setup = format!(
                    "SET TRANSACTION READ ONLY; SET LOCAL statement_timeout = {}",
                    self.statement_timeout.as_millis()
                );
                let conn: &mut PgConnection = &mut tx;
                interruptible(
                    &interrupt,
                    db,
                    Box::pin(async move {
                        Executor::execute(conn, sqlx::raw_sql(&setup))
                            .await
                            .map(|_| ())
                            .map_err(|e| database_error(db, e))
                    }),
                )
                .await?;
                Session::ReadOnly(tx)
            }
            AccessMode::Unrestricted => {
                let conn = interruptible(
                    &interrupt,
                    db,
                    Box::pin(async move { pool.acquire().await.map_err(|e| acquire_error(db, e)) }),
                )
                .await?;
                Session::ReadWrite(conn)
            }
        };

        tracing::debug!(database = %database, access_mode = %handle.access_mode(), "Session opened");
        Ok(GuardedConnection {
            lease,
            session,
            interrupt,
            statement_timeout: self.statement_timeout,
            expired: false,
        })
    }
}

enum Session {
    ReadOnly(Transaction<'static, Postgres>),
    ReadWrite(PoolConnection<Postgres>),
}

impl Session {
    fn connection(&mut self) -> &mut PgConnection {
        match self {
            Session::ReadOnly(tx) => tx.deref_mut(),
            Session::ReadWrite(conn) => conn.deref_mut(),
        }
    }

    /// Unrestricted batches that open a transaction or change session state
    /// would hand that state to the next caller; such connections are
    /// closed instead of returned to the pool.
    fn isolate(&mut self, sql: &str) {
        if let Session::ReadWrite(conn) = self {
            if classify::leaves_session_state(sql) {
                conn.close_on_drop();
            }
        }
    }
}

/// A connection bound to one database and its policy.
///
/// Dropping it returns the connection to its pool (rolling back a restricted
/// transaction) and releases the lease on the handle.
pub struct GuardedConnection {
    lease: PoolLease,
    session: Session,
    interrupt: CancellationToken,
    statement_timeout: Duration,
    /// Set once a client-side deadline abandoned a statement mid-flight.
    expired: bool,
}

impl std::fmt::Debug for GuardedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedConnection")
            .field("database", &self.lease.name())
            .field("access_mode", &self.lease.access_mode())
            .finish()
    }
}

impl GuardedConnection {
    pub fn database(&self) -> &str {
        self.lease.name()
    }

    pub fn access_mode(&self) -> AccessMode {
        self.lease.access_mode()
    }

    /// Run a SQL batch through the simple query protocol.
    pub async fn query(&mut self, sql: &str) -> Result<QueryOutput, GuardError> {
        self.check(sql)?;
        self.session.isolate(sql);
        let database = self.lease.name().to_string();
        let db = database.as_str();
        let timeout = self.statement_timeout;
        let deadline = self.client_deadline();
        let interrupt = self.interrupt.clone();
        let conn = self.session.connection();
        let work = Box::pin(interruptible(
            &interrupt,
            db,
            Box::pin(async move {
                let mut output = QueryOutput::default();
                let mut stream = sqlx::raw_sql(sql).fetch_many(conn);
                while let Some(item) = stream
                    .try_next()
                    .await
                    .map_err(|e| classify_error(db, sql, timeout, e))?
                {
                    match item {
                        Either::Left(done) => output.rows_affected += done.rows_affected(),
                        Either::Right(row) => push_row(&mut output, &row)
                            .map_err(|e| classify_error(db, sql, timeout, e))?,
                    }
                }
                Ok(output)
            }),
        ));
        let (result, expired) = bounded(deadline, db, sql, timeout, work).await;
        self.expired |= expired;
        result
    }

    /// Run one statement with `$n` placeholders bound to text parameters.
    pub async fn query_params(&mut self, sql: &str, params: &[&str]) -> Result<QueryOutput, GuardError> {
        self.check(sql)?;
        self.session.isolate(sql);
        let database = self.lease.name().to_string();
        let db = database.as_str();
        let timeout = self.statement_timeout;
        let deadline = self.client_deadline();
        let interrupt = self.interrupt.clone();
        let conn = self.session.connection();
        let work = Box::pin(interruptible(
            &interrupt,
            db,
            Box::pin(async move {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(*param);
                }
                let rows = query
                    .fetch_all(conn)
                    .await
                    .map_err(|e| classify_error(db, sql, timeout, e))?;
                let mut output = QueryOutput::default();
                for row in &rows {
                    push_row(&mut output, row).map_err(|e| classify_error(db, sql, timeout, e))?;
                }
                Ok(output)
            }),
        ));
        let (result, expired) = bounded(deadline, db, sql, timeout, work).await;
        self.expired |= expired;
        result
    }

    /// End the session. Restricted sessions always roll back.
    ///
    /// A session whose statement was abandoned by the client-side deadline is
    /// dropped instead; the server may still be running it.
    pub async fn finish(self) {
        let database = self.lease.name().to_string();
        if self.expired {
            tracing::debug!(database = %database, "Dropping session after an abandoned statement");
            return;
        }
        if let Session::ReadOnly(tx) = self.session {
            if let Err(e) = tx.rollback().await {
                tracing::debug!(database = %database, error = %e, "Rollback failed, connection will be discarded");
            }
        }
    }

    /// Restricted statements are also bounded on the client, in case the
    /// server-side timeout was changed from inside the transaction.
    fn client_deadline(&self) -> Option<Duration> {
        match self.access_mode() {
            AccessMode::Restricted => Some(self.statement_timeout + CLIENT_TIMEOUT_SLACK),
            AccessMode::Unrestricted => None,
        }
    }

    fn check(&self, sql: &str) -> Result<(), GuardError> {
        if self.access_mode() == AccessMode::Restricted {
            classify::check_read_only(sql).map_err(|r| denied(self.lease.name(), r))?;
        }
        Ok(())
    }
}

async fn interruptible<T>(
    token: &CancellationToken,
    database: &str,
    fut: BoxFuture<'_, Result<T, GuardError>>,
) -> Result<T, GuardError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(GuardError::Interrupted { database: database.to_string() }),
        result = fut => result,
    }
}

/// Run `work` under an optional client-side deadline. The flag reports
/// whether the deadline abandoned it.
async fn bounded(
    deadline: Option<Duration>,
    database: &str,
    sql: &str,
    timeout: Duration,
    work: BoxFuture<'_, Result<QueryOutput, GuardError>>,
) -> (Result<QueryOutput, GuardError>, bool) {
    let Some(deadline) = deadline else {
        return (work.await, false);
    };
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => (result, false),
        Err(_) => {
            tracing::warn!(
                database = %database,
                deadline = ?deadline,
                "Restricted statement outlived its timeout, abandoning it"
            );
            let err = GuardError::Timeout {
                database: database.to_string(),
                statement_summary: classify::summarize(sql),
                timeout,
            };
            (Err(err), true)
        }
    }
}

fn denied(database: &str, rejection: Rejection) -> GuardError {
    tracing::info!(
        database = %database,
        statement = %rejection.statement_summary,
        "Rejected write on restricted database"
    );
    GuardError::AccessDenied {
        database: database.to_string(),
        reason: rejection.to_string(),
        statement_summary: rejection.statement_summary,
    }
}

fn acquire_error(database: &str, err: sqlx::Error) -> GuardError {
    GuardError::Acquire {
        database: database.to_string(),
        reason: err.to_string(),
    }
}

fn database_error(database: &str, err: sqlx::Error) -> GuardError {
    let code = err
        .as_database_error()
        .and_then(|e| e.code())
        .map(|c| c.into_owned());
    GuardError::Database {
        database: database.to_string(),
        code,
        message: err.to_string(),
    }
}

fn classify_error(database: &str, sql: &str, timeout: Duration, err: sqlx::Error) -> GuardError {
    let code = err
        .as_database_error()
        .and_then(|e| e.code())
        .map(|c| c.into_owned());
    match code.as_deref() {
        Some(SQLSTATE_QUERY_CANCELED) => GuardError::Timeout {
            database: database.to_string(),
            statement_summary: classify::summarize(sql),
            timeout,
        },
        Some(SQLSTATE_READ_ONLY_TRANSACTION) => GuardError::AccessDenied {
            database: database.to_string(),
            statement_summary: classify::summarize(sql),
            reason: err.to_string(),
        },
        _ => match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => acquire_error(database, err),
            other => database_error(database, other),
        },
    }
}

fn push_row(output: &mut QueryOutput, row: &PgRow) -> Result<(), sqlx::Error> {
    if output.columns.is_empty() {
        output.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    }
    let mut object = Map::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), cell_value(row, i, column.type_info().name())?);
    }
    output.rows.push(object);
    Ok(())
}

/// Decode one cell into JSON by its PostgreSQL type name.
fn cell_value(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|f| float(f64::from(f))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(float),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        _ => row
            .try_get_unchecked::<Option<String>, _>(index)?
            .map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}
