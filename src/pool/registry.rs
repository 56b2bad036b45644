//! Live mapping from database name to pool handle.
//!
//! # Responsibilities
//! - Initial load with per-entry probing (degraded start on partial failure)
//! - Lock-free lookup against the current snapshot
//! - Hot reload: diff by signature, probe before swap, drain what was retired
//! - Shutdown of every handle
//!
//! # Design Decisions
//! - The snapshot is immutable and swapped with `ArcSwap`; readers never lock
//! - Reloads are serialized by an async mutex that readers never touch
//! - Probes and drains happen outside the swap; only `store` is the critical step
//! - A failed entry never fails its neighbours

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{AccessMode, ConfigError, ConfigLoader, ConfigSet, DatabaseConfig, PoolSettings};
use crate::observability::metrics;
use crate::pool::connector::{redact_uri, PoolConnector, PoolError};
use crate::pool::handle::{PoolHandle, PoolState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("database `{name}` not found (available: {})", available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("database `{name}` is unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("no usable database: every configured entry failed its health probe")]
    NoUsableDatabase { failed: Vec<FailedEntry> },
}

/// An entry that could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntry {
    pub name: String,
    pub reason: String,
}

/// Outcome of a reload, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<FailedEntry>,
    pub generation: u64,
}

impl ReloadReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// What `list()` reports for one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStatus {
    pub name: String,
    pub description: Option<String>,
    pub access_mode: AccessMode,
    pub state: PoolState,
    pub connected: bool,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DatabaseStatus {
    fn of(handle: &PoolHandle) -> Self {
        Self {
            name: handle.name().to_string(),
            description: handle.description(),
            access_mode: handle.access_mode(),
            state: handle.state(),
            connected: handle.is_connected(),
            generation: handle.generation(),
            last_error: handle.last_error(),
        }
    }
}

/// Immutable view of the registry at one generation.
#[derive(Debug, Default)]
struct Snapshot {
    generation: u64,
    handles: Vec<Arc<PoolHandle>>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    fn new(generation: u64, handles: Vec<Arc<PoolHandle>>) -> Self {
        let index = handles
            .iter()
            .enumerate()
            .map(|(i, h)| (h.name().to_string(), i))
            .collect();
        Self {
            generation,
            handles,
            index,
        }
    }

    fn get(&self, name: &str) -> Option<&Arc<PoolHandle>> {
        self.index.get(name).map(|&i| &self.handles[i])
    }

    fn names(&self) -> Vec<String> {
        self.handles
            .iter()
            .filter(|h| matches!(h.state(), PoolState::Active | PoolState::NeedsAttention))
            .map(|h| h.name().to_string())
            .collect()
    }
}

/// Owner of every live pool.
#[derive(Debug)]
pub struct PoolRegistry {
    current: ArcSwap<Snapshot>,
    reload_lock: tokio::sync::Mutex<()>,
    connector: Arc<dyn PoolConnector>,
    settings: PoolSettings,
    drains: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolRegistry {
    /// Build and probe a pool for every entry.
    ///
    /// Entries whose probe fails are kept as `NeedsAttention`. Fails only when
    /// no entry ends up Active.
    pub async fn load(
        set: &ConfigSet,
        settings: PoolSettings,
        connector: Arc<dyn PoolConnector>,
    ) -> Result<Self, RegistryError> {
        let registry = Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            reload_lock: tokio::sync::Mutex::new(()),
            connector,
            settings,
            drains: Mutex::new(Vec::new()),
        };

        let generation = 0;
        let results = join_all(set.iter().map(|config| registry.bring_up(config, generation))).await;

        let mut handles = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for result in results {
            match result {
                BringUp::Ready(handle) => handles.push(handle),
                BringUp::Degraded(handle, reason) => {
                    failed.push(FailedEntry {
                        name: handle.name().to_string(),
                        reason,
                    });
                    handles.push(handle);
                }
                BringUp::Invalid(entry) => failed.push(entry),
            }
        }

        if !handles.iter().any(|h| h.is_active()) {
            for handle in &handles {
                handle.shutdown(std::time::Duration::ZERO).await;
            }
            return Err(RegistryError::NoUsableDatabase { failed });
        }

        for handle in &handles {
            metrics::record_pool_state(handle.name(), handle.state());
        }
        tracing::info!(
            databases = handles.len(),
            degraded = failed.len(),
            "Pool registry loaded"
        );
        registry.current.store(Arc::new(Snapshot::new(generation, handles)));
        Ok(registry)
    }

    /// Resolve a name to an Active handle.
    pub fn get(&self, name: &str) -> Result<Arc<PoolHandle>, RegistryError> {
        let snapshot = self.current.load();
        match snapshot.get(name) {
            Some(handle) => match handle.state() {
                PoolState::Active => Ok(handle.clone()),
                PoolState::NeedsAttention => Err(RegistryError::Unavailable {
                    name: name.to_string(),
                    reason: handle
                        .last_error()
                        .unwrap_or_else(|| "database failed its health probe".to_string()),
                }),
                PoolState::Draining | PoolState::Closed => Err(RegistryError::NotFound {
                    name: name.to_string(),
                    available: snapshot.names(),
                }),
            },
            None => Err(RegistryError::NotFound {
                name: name.to_string(),
                available: snapshot.names(),
            }),
        }
    }

    /// Status of every registered database, in configuration order.
    pub fn list(&self) -> Vec<DatabaseStatus> {
        self.current
            .load()
            .handles
            .iter()
            .map(|h| DatabaseStatus::of(h))
            .collect()
    }

    /// Every handle in the current snapshot.
    pub fn handles(&self) -> Vec<Arc<PoolHandle>> {
        self.current.load().handles.clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Probe one handle and record the result; promotes a recovered
    /// `NeedsAttention` handle to Active.
    pub async fn probe(&self, handle: &PoolHandle) -> Result<(), PoolError> {
        let result = self
            .connector
            .probe(&handle.config(), handle.pool(), self.settings.probe_timeout)
            .await;
        handle.record_probe(&result);
        if result.is_ok() && handle.promote() {
            tracing::info!(database = %handle.name(), "Database recovered, now active");
        }
        result
    }

    /// Apply a new configuration set.
    ///
    /// Reloads are serialized. Unchanged entries keep their handle; added and
    /// changed entries are probed before the swap; retired handles drain in
    /// the background.
    pub async fn reload(&self, set: &ConfigSet) -> ReloadReport {
        let _guard = self.reload_lock.lock().await;
        let old = self.current.load_full();
        let next_generation = old.generation + 1;

        if set.is_empty() {
            tracing::warn!("Reloading to an empty database set; every pool will be retired");
        }

        let mut report = ReloadReport::default();

        // Decide per entry, building and probing whatever is new.
        let mut pending = Vec::new();
        for config in set {
            match old.get(&config.name) {
                Some(existing) if existing.signature() == config.signature() => {
                    if existing.description() != config.description {
                        existing.set_description(config.description.clone());
                    }
                    report.unchanged.push(config.name.clone());
                    pending.push(Pending::Keep(existing.clone()));
                }
                Some(existing) => pending.push(Pending::Replace {
                    previous: existing.clone(),
                    config,
                }),
                None => pending.push(Pending::Add(config)),
            }
        }

        let brought_up = join_all(pending.into_iter().map(|p| async move {
            match p {
                Pending::Keep(h) => Resolved::Keep(h),
                Pending::Add(config) => Resolved::Added(self.bring_up(config, next_generation).await),
                Pending::Replace { previous, config } => Resolved::Replaced {
                    previous,
                    outcome: self.bring_up(config, next_generation).await,
                },
            }
        }))
        .await;

        let mut handles = Vec::with_capacity(brought_up.len());
        let mut retired = Vec::new();
        for resolved in brought_up {
            match resolved {
                Resolved::Keep(h) => handles.push(h),
                Resolved::Added(BringUp::Ready(h)) => {
                    report.added.push(h.name().to_string());
                    handles.push(h);
                }
                Resolved::Added(BringUp::Degraded(h, reason)) => {
                    report.added.push(h.name().to_string());
                    report.failed.push(FailedEntry {
                        name: h.name().to_string(),
                        reason,
                    });
                    handles.push(h);
                }
                Resolved::Added(BringUp::Invalid(entry)) => report.failed.push(entry),
                Resolved::Replaced { previous, outcome } => match outcome {
                    BringUp::Ready(h) => {
                        report.changed.push(h.name().to_string());
                        retired.push(previous);
                        handles.push(h);
                    }
                    BringUp::Degraded(h, reason) => {
                        h.shutdown(std::time::Duration::ZERO).await;
                        keep_previous(&mut report, &mut handles, previous, reason);
                    }
                    BringUp::Invalid(entry) => {
                        keep_previous(&mut report, &mut handles, previous, entry.reason);
                    }
                },
            }
        }

        for h in old.handles.iter() {
            if set.get(h.name()).is_none() {
                report.removed.push(h.name().to_string());
                retired.push(h.clone());
            }
        }

        let unchanged_layout = handles.len() == old.handles.len()
            && handles
                .iter()
                .zip(old.handles.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b));

        if unchanged_layout {
            report.generation = old.generation;
            metrics::record_reload("noop");
            tracing::info!(
                generation = old.generation,
                unchanged = report.unchanged.len(),
                "Reload found nothing to apply"
            );
            return report;
        }

        // Retired handles stop granting leases before the new mapping is
        // visible, so a lookup never sees both generations for one name.
        for h in &retired {
            h.begin_drain();
        }
        self.current
            .store(Arc::new(Snapshot::new(next_generation, handles)));
        report.generation = next_generation;

        for h in retired {
            self.spawn_drain(h);
        }

        metrics::record_reload(if report.failed.is_empty() { "applied" } else { "partial" });
        tracing::info!(
            generation = next_generation,
            added = ?report.added,
            removed = ?report.removed,
            changed = ?report.changed,
            failed = report.failed.len(),
            "Database configuration reloaded"
        );
        report
    }

    /// Load the configuration again and apply it.
    ///
    /// A load failure leaves the registry untouched.
    pub async fn reload_from(&self, loader: &ConfigLoader) -> Result<ReloadReport, ConfigError> {
        match loader.load() {
            Ok(loaded) => Ok(self.reload(&loaded.databases).await),
            Err(e) => {
                metrics::record_reload("config_error");
                tracing::error!(error = %e, "Reload aborted, keeping current databases");
                Err(e)
            }
        }
    }

    /// Shut every handle down and wait for background drains.
    pub async fn close_all(&self) {
        let _guard = self.reload_lock.lock().await;
        let snapshot = self.current.swap(Arc::new(Snapshot {
            generation: self.generation(),
            ..Snapshot::default()
        }));
        let grace = self.settings.drain_timeout;
        join_all(snapshot.handles.iter().map(|h| h.shutdown(grace))).await;
        self.wait_for_drains().await;
        tracing::info!(databases = snapshot.handles.len(), "All pools closed");
    }

    /// Await every drain spawned by earlier reloads.
    pub async fn wait_for_drains(&self) {
        let tasks: Vec<_> = std::mem::take(
            &mut *self.drains.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in join_all(tasks).await {
            if let Err(e) = task {
                tracing::error!(error = %e, "Drain task failed");
            }
        }
    }

    fn spawn_drain(&self, handle: Arc<PoolHandle>) {
        let timeout = self.settings.drain_timeout;
        let task = tokio::spawn(async move {
            let outcome = handle.drain(timeout).await;
            metrics::record_drain(handle.name(), outcome);
        });
        let mut drains = self.drains.lock().unwrap_or_else(PoisonError::into_inner);
        drains.retain(|t| !t.is_finished());
        drains.push(task);
    }

    async fn bring_up(&self, config: &DatabaseConfig, generation: u64) -> BringUp {
        let pool = match self.connector.build(config, &self.settings) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!(database = %config.name, error = %e, "Failed to build pool");
                return BringUp::Invalid(FailedEntry {
                    name: config.name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let result = self
            .connector
            .probe(config, &pool, self.settings.probe_timeout)
            .await;
        match result {
            Ok(()) => {
                tracing::info!(
                    database = %config.name,
                    uri = %redact_uri(&config.uri),
                    access_mode = %config.access_mode,
                    generation,
                    "Pool ready"
                );
                BringUp::Ready(Arc::new(PoolHandle::new(
                    config,
                    pool,
                    generation,
                    PoolState::Active,
                )))
            }
            Err(e) => {
                tracing::warn!(
                    database = %config.name,
                    uri = %redact_uri(&config.uri),
                    error = %e,
                    "Health probe failed, database needs attention"
                );
                let handle = PoolHandle::new(config, pool, generation, PoolState::NeedsAttention);
                let reason = e.to_string();
                handle.record_probe(&Err(e));
                BringUp::Degraded(Arc::new(handle), reason)
            }
        }
    }
}

fn keep_previous(
    report: &mut ReloadReport,
    handles: &mut Vec<Arc<PoolHandle>>,
    previous: Arc<PoolHandle>,
    reason: String,
) {
    tracing::warn!(
        database = %previous.name(),
        reason = %reason,
        "Replacement pool failed, keeping previous configuration"
    );
    report.failed.push(FailedEntry {
        name: previous.name().to_string(),
        reason,
    });
    handles.push(previous);
}

enum BringUp {
    Ready(Arc<PoolHandle>),
    Degraded(Arc<PoolHandle>, String),
    Invalid(FailedEntry),
}

enum Pending<'a> {
    Keep(Arc<PoolHandle>),
    Add(&'a DatabaseConfig),
    Replace {
        previous: Arc<PoolHandle>,
        config: &'a DatabaseConfig,
    },
}

enum Resolved {
    Keep(Arc<PoolHandle>),
    Added(BringUp),
    Replaced {
        previous: Arc<PoolHandle>,
        outcome: BringUp,
    },
}
