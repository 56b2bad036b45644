//! Configuration validation.
//!
//! # Responsibilities
//! - Turn the loose [`RawConfigFile`] into a strict [`ConfigSet`] + [`Settings`]
//! - Reject missing fields, out-of-enum values and duplicate names
//! - Validate value ranges (pool size and timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure: RawConfigFile → Result<(Settings, ConfigSet), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;
use url::Url;

use crate::config::schema::{
    AccessMode, ConfigSet, DatabaseConfig, RawConfigFile, RawDatabaseEntry, Settings,
};

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing `databases` list")]
    MissingDatabases,

    #[error("databases[{index}]: missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("duplicate database name `{0}`")]
    DuplicateName(String),

    #[error("database `{name}`: invalid access_mode `{value}` (expected `unrestricted` or `restricted`)")]
    InvalidAccessMode { name: String, value: String },

    #[error("database `{name}`: invalid uri: {reason}")]
    InvalidUri { name: String, reason: String },

    #[error("`{0}` must be greater than zero")]
    NotPositive(&'static str),
}

/// Validate a whole document.
pub fn validate_config(raw: RawConfigFile) -> Result<(Settings, ConfigSet), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let settings = Settings {
        server: raw.server,
        pool: raw.pool,
        access: raw.access,
        tools: raw.tools,
        health_check: raw.health_check,
        observability: raw.observability,
    };
    errors.extend(validate_settings(&settings));

    let mut databases = Vec::new();
    match raw.databases {
        None => errors.push(ValidationError::MissingDatabases),
        Some(entries) => {
            for (index, entry) in entries.into_iter().enumerate() {
                match validate_database(index, entry) {
                    Ok(db) => databases.push(db),
                    Err(mut errs) => errors.append(&mut errs),
                }
            }
        }
    }

    if let Err(mut errs) = check_names(&databases) {
        errors.append(&mut errs);
    }

    if errors.is_empty() {
        Ok((settings, ConfigSet::new(databases)?))
    } else {
        Err(errors)
    }
}

/// Validate one raw `databases:` item.
pub fn validate_database(
    index: usize,
    raw: RawDatabaseEntry,
) -> Result<DatabaseConfig, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let name = non_empty(raw.name);
    let uri = non_empty(raw.uri);

    if name.is_none() {
        errors.push(ValidationError::MissingField { index, field: "name" });
    }
    if uri.is_none() {
        errors.push(ValidationError::MissingField { index, field: "uri" });
    }

    let label = name.clone().unwrap_or_else(|| format!("databases[{index}]"));

    let access_mode = match raw.access_mode.as_deref() {
        None => AccessMode::default(),
        Some(value) => match value.parse::<AccessMode>() {
            Ok(mode) => mode,
            Err(value) => {
                errors.push(ValidationError::InvalidAccessMode {
                    name: label.clone(),
                    value,
                });
                AccessMode::default()
            }
        },
    };

    if let Some(uri) = &uri {
        if let Err(reason) = check_uri(uri) {
            errors.push(ValidationError::InvalidUri { name: label, reason });
        }
    }

    match (name, uri) {
        (Some(name), Some(uri)) if errors.is_empty() => Ok(DatabaseConfig {
            name,
            description: raw.description,
            uri,
            access_mode,
        }),
        _ => Err(errors),
    }
}

/// Names must be non-empty and unique.
pub fn check_names(databases: &[DatabaseConfig]) -> Result<(), Vec<ValidationError>> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut errors = Vec::new();

    for (index, db) in databases.iter().enumerate() {
        if db.name.trim().is_empty() {
            errors.push(ValidationError::MissingField { index, field: "name" });
        } else if !seen.insert(db.name.as_str()) && reported.insert(db.name.as_str()) {
            errors.push(ValidationError::DuplicateName(db.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_settings(settings: &Settings) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if settings.pool.max_connections == 0 {
        errors.push(ValidationError::NotPositive("pool.max_connections"));
    }
    let durations: [(&'static str, Duration); 6] = [
        ("pool.acquire_timeout", settings.pool.acquire_timeout),
        ("pool.probe_timeout", settings.pool.probe_timeout),
        ("pool.drain_timeout", settings.pool.drain_timeout),
        ("access.statement_timeout", settings.access.statement_timeout),
        ("tools.call_timeout", settings.tools.call_timeout),
        ("health_check.interval", settings.health_check.interval),
    ];
    for (field, value) in durations {
        if value.is_zero() {
            errors.push(ValidationError::NotPositive(field));
        }
    }
    errors
}

fn check_uri(uri: &str) -> Result<(), String> {
    let parsed = Url::parse(uri).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "postgres" | "postgresql" => {}
        other => return Err(format!("unsupported scheme `{other}`")),
    }
    // Catches parameters the driver would refuse (bad sslmode, port, ...).
    PgConnectOptions::from_str(uri)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: Option<&str>, uri: Option<&str>, mode: Option<&str>) -> RawDatabaseEntry {
        RawDatabaseEntry {
            name: name.map(String::from),
            description: None,
            uri: uri.map(String::from),
            access_mode: mode.map(String::from),
        }
    }

    #[test]
    fn test_missing_name_and_uri_reported_together() {
        let errors = validate_database(3, entry(None, Some("  "), None)).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingField { index: 3, field: "name" },
                ValidationError::MissingField { index: 3, field: "uri" },
            ]
        );
    }

    #[test]
    fn test_access_mode_out_of_enum() {
        let errors = validate_database(
            0,
            entry(Some("a"), Some("postgres://localhost/a"), Some("readonly")),
        )
        .unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidAccessMode {
                name: "a".into(),
                value: "readonly".into()
            }]
        );
    }

    #[test]
    fn test_non_postgres_uri_rejected() {
        let errors =
            validate_database(0, entry(Some("a"), Some("mysql://localhost/a"), None)).unwrap_err();
        assert!(matches!(&errors[0], ValidationError::InvalidUri { name, .. } if name == "a"));
    }

    #[test]
    fn test_duplicates_reported_once() {
        let db = DatabaseConfig::new("a", "postgres://localhost/a", AccessMode::Restricted);
        let errors = check_names(&[db.clone(), db.clone(), db]).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DuplicateName("a".into())]);
    }

    #[test]
    fn test_all_errors_collected() {
        let mut raw = RawConfigFile {
            databases: Some(vec![
                entry(Some("a"), Some("postgres://localhost/a"), None),
                entry(Some("a"), Some("postgres://localhost/b"), None),
                entry(None, Some("postgres://localhost/c"), None),
            ]),
            ..Default::default()
        };
        raw.pool.max_connections = 0;

        let errors = validate_config(raw).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::NotPositive("pool.max_connections")));
        assert!(errors.contains(&ValidationError::DuplicateName("a".into())));
    }

    #[test]
    fn test_missing_databases_key() {
        let errors = validate_config(RawConfigFile::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingDatabases]);
    }
}
