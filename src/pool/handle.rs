//! Per-database pool handle.
//!
//! # Responsibilities
//! - Own one `sqlx` pool and the access policy it was created with
//! - Track lifecycle state (Active/NeedsAttention/Draining/Closed)
//! - Count in-flight leases so retirement can drain them
//! - Interrupt remaining work when a drain deadline expires

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use sqlx::postgres::PgPool;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::{AccessMode, ConfigSignature, DatabaseConfig};
use crate::observability::metrics;
use crate::pool::connector::PoolError;

/// Upper bound on waiting for `PgPool::close` once work has been interrupted.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a pool handle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Active = 0,
    NeedsAttention = 1,
    Draining = 2,
    Closed = 3,
}

impl From<u8> for PoolState {
    fn from(val: u8) -> Self {
        match val {
            0 => PoolState::Active,
            1 => PoolState::NeedsAttention,
            2 => PoolState::Draining,
            _ => PoolState::Closed,
        }
    }
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Active => "active",
            PoolState::NeedsAttention => "needs_attention",
            PoolState::Draining => "draining",
            PoolState::Closed => "closed",
        }
    }
}

/// How a retired handle finished draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every lease was released before the deadline.
    Graceful,
    /// The deadline expired; this many leases were interrupted.
    Forced { interrupted: usize },
}

/// A live pool for one configured database.
#[derive(Debug)]
pub struct PoolHandle {
    name: String,
    uri: String,
    access_mode: AccessMode,
    description: RwLock<Option<String>>,
    pool: PgPool,
    generation: u64,

    state: AtomicU8,
    in_flight: AtomicUsize,
    idle: Notify,
    interrupt: CancellationToken,

    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl PoolHandle {
    /// Create a handle in the given initial state.
    pub fn new(config: &DatabaseConfig, pool: PgPool, generation: u64, state: PoolState) -> Self {
        Self {
            name: config.name.clone(),
            uri: config.uri.clone(),
            access_mode: config.access_mode,
            description: RwLock::new(config.description.clone()),
            pool,
            generation,
            state: AtomicU8::new(state as u8),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            interrupt: CancellationToken::new(),
            connected: AtomicBool::new(state == PoolState::Active),
            last_error: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The configuration this handle was created from.
    pub fn config(&self) -> DatabaseConfig {
        DatabaseConfig {
            name: self.name.clone(),
            description: self.description(),
            uri: self.uri.clone(),
            access_mode: self.access_mode,
        }
    }

    pub fn signature(&self) -> ConfigSignature {
        ConfigSignature {
            uri: self.uri.clone(),
            access_mode: self.access_mode,
        }
    }

    pub fn description(&self) -> Option<String> {
        self.description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Metadata-only update; never disturbs the pool.
    pub fn set_description(&self, description: Option<String>) {
        *self
            .description
            .write()
            .unwrap_or_else(PoisonError::into_inner) = description;
    }

    pub fn state(&self) -> PoolState {
        PoolState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == PoolState::Active
    }

    /// Active and the most recent probe succeeded.
    pub fn is_connected(&self) -> bool {
        self.is_active() && self.connected.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of leases currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Token cancelled when remaining work must stop.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Record the outcome of a connectivity probe.
    pub fn record_probe(&self, result: &Result<(), PoolError>) {
        let mut last_error = self
            .last_error
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(()) => {
                self.connected.store(true, Ordering::Relaxed);
                *last_error = None;
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                *last_error = Some(e.to_string());
            }
        }
    }

    // --- Leases ---

    /// Try to take a lease for new work. Only Active handles grant leases.
    pub fn try_lease(self: &Arc<Self>) -> Option<PoolLease> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if !self.is_active() {
            self.release();
            return None;
        }
        Some(PoolLease {
            handle: self.clone(),
        })
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    // --- State transitions ---

    fn transition(&self, from: &[PoolState], to: PoolState) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if !from.contains(&PoolState::from(current)) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    metrics::record_pool_state(&self.name, to);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// NeedsAttention → Active after a successful probe.
    pub fn promote(&self) -> bool {
        self.transition(&[PoolState::NeedsAttention], PoolState::Active)
    }

    /// Stop granting leases. Active/NeedsAttention → Draining.
    pub fn begin_drain(&self) -> bool {
        self.transition(
            &[PoolState::Active, PoolState::NeedsAttention],
            PoolState::Draining,
        )
    }

    /// Retire the handle: wait for leases up to `timeout`, interrupt whatever
    /// remains, then close the pool (Draining → Closed).
    pub async fn drain(&self, timeout: Duration) -> DrainOutcome {
        self.begin_drain();

        let outcome = match tokio::time::timeout(timeout, self.wait_idle()).await {
            Ok(()) => DrainOutcome::Graceful,
            Err(_) => {
                let interrupted = self.in_flight();
                tracing::warn!(
                    database = %self.name,
                    generation = self.generation,
                    interrupted,
                    timeout = ?timeout,
                    "Drain timeout elapsed, interrupting in-flight work"
                );
                self.interrupt.cancel();
                DrainOutcome::Forced { interrupted }
            }
        };

        self.transition(&[PoolState::Draining], PoolState::Closed);
        self.close_pool().await;
        tracing::info!(
            database = %self.name,
            generation = self.generation,
            outcome = ?outcome,
            "Pool closed"
        );
        outcome
    }

    /// Shutdown path: any state → Closed directly, then the same grace period
    /// and interruption as a drain.
    pub async fn shutdown(&self, grace: Duration) {
        self.transition(
            &[PoolState::Active, PoolState::NeedsAttention, PoolState::Draining],
            PoolState::Closed,
        );
        if tokio::time::timeout(grace, self.wait_idle()).await.is_err() {
            tracing::warn!(
                database = %self.name,
                interrupted = self.in_flight(),
                "Shutdown grace elapsed, interrupting in-flight work"
            );
            self.interrupt.cancel();
        }
        self.close_pool().await;
    }

    async fn close_pool(&self) {
        if tokio::time::timeout(CLOSE_GRACE, self.pool.close()).await.is_err() {
            tracing::error!(database = %self.name, "Timed out waiting for connections to return to a closing pool");
        }
    }
}

/// A RAII guard that keeps a handle's in-flight count raised.
#[derive(Debug)]
pub struct PoolLease {
    handle: Arc<PoolHandle>,
}

impl PoolLease {
    pub fn handle(&self) -> &Arc<PoolHandle> {
        &self.handle
    }
}

impl Deref for PoolLease {
    type Target = PoolHandle;
    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.handle.release();
    }
}
