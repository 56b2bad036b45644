//! Configuration schema definitions.
//!
//! Two layers live here: the raw document as it comes off disk
//! ([`RawConfigFile`], every database field optional and loosely typed) and the
//! validated model ([`ConfigSet`], [`DatabaseConfig`], [`Settings`]) that the
//! rest of the server consumes. Only `validation.rs` converts between them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SQL access policy for a single database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Full read/write access.
    Unrestricted,
    /// Read-only transactions with a statement timeout.
    #[default]
    Restricted,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Unrestricted => "unrestricted",
            AccessMode::Restricted => "restricted",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unrestricted" => Ok(AccessMode::Unrestricted),
            "restricted" => Ok(AccessMode::Restricted),
            other => Err(other.to_string()),
        }
    }
}

/// A validated database entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    /// Unique, non-empty identifier used as `database_name` by tools.
    pub name: String,

    /// Free-form text shown by `list_databases`.
    pub description: Option<String>,

    /// PostgreSQL connection string.
    pub uri: String,

    /// Access policy, `restricted` unless configured otherwise.
    pub access_mode: AccessMode,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, access_mode: AccessMode) -> Self {
        Self {
            name: name.into(),
            description: None,
            uri: uri.into(),
            access_mode,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The part of an entry whose change forces a new pool.
    pub fn signature(&self) -> ConfigSignature {
        ConfigSignature {
            uri: self.uri.clone(),
            access_mode: self.access_mode,
        }
    }
}

/// Reload diff key: `(uri, access_mode)`. Descriptions are metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigSignature {
    pub uri: String,
    pub access_mode: AccessMode,
}

/// Ordered, name-unique set of database entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConfigSet {
    databases: Vec<DatabaseConfig>,
}

impl ConfigSet {
    /// Build a set, rejecting duplicate or empty names.
    pub fn new(
        databases: Vec<DatabaseConfig>,
    ) -> Result<Self, Vec<crate::config::validation::ValidationError>> {
        crate::config::validation::check_names(&databases)?;
        Ok(Self { databases })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DatabaseConfig> {
        self.databases.iter()
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.databases.iter().map(|db| db.name.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a ConfigSet {
    type Item = &'a DatabaseConfig;
    type IntoIter = std::slice::Iter<'a, DatabaseConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.databases.iter()
    }
}

/// Everything a configuration file yields after validation.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// File the configuration was read from.
    pub source: std::path::PathBuf,
    pub settings: Settings,
    pub databases: ConfigSet,
}

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

/// The configuration document exactly as deserialized.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub access: AccessSettings,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// `None` when the key is absent; a non-list value fails to parse.
    pub databases: Option<Vec<RawDatabaseEntry>>,
}

/// One `databases:` item before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDatabaseEntry {
    pub name: Option<String>,
    pub description: Option<String>,
    pub uri: Option<String>,
    pub access_mode: Option<String>,
}

// ---------------------------------------------------------------------------
// Ambient settings
// ---------------------------------------------------------------------------

/// Process-wide settings. Applied at startup only; reload touches databases.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub pool: PoolSettings,
    pub access: AccessSettings,
    pub tools: ToolSettings,
    pub health_check: HealthCheckConfig,
    pub observability: ObservabilityConfig,
}

/// HTTP surface and reload behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Bind address for the tool/admin HTTP surface.
    pub bind_address: String,

    /// Reload automatically when the configuration file changes.
    pub watch_config: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8765".to_string(),
            watch_config: false,
        }
    }
}

/// Per-database pool sizing and lifecycle timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Upper bound on connections per database.
    pub max_connections: u32,

    /// How long a caller waits for a free connection.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// Deadline for the `SELECT 1` connectivity probe.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// How long a retired pool waits for in-flight work before force-closing.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Restricted-mode enforcement settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessSettings {
    /// `statement_timeout` applied inside restricted transactions.
    #[serde(with = "humantime_serde")]
    pub statement_timeout: Duration,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// Tool dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSettings {
    /// Per-call deadline, independent of the statement timeout.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Background re-probing of pools.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheckConfig {
    /// Enable the background health monitor.
    pub enabled: bool,

    /// Probe interval.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
