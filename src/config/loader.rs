//! Configuration loading from disk.
//!
//! Source resolution order (first existing, readable file wins):
//!
//! 1. Explicit override: `--config` flag, else `DATABASES_CONFIG_PATH`
//! 2. User scope: `~/.cursor/databases.yaml`
//! 3. Project scope: `./.cursor/databases.yaml`
//! 4. Current directory: `./databases.yaml`
//!
//! An explicit override is authoritative: if it does not exist the candidates
//! are not consulted.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::schema::{ConfigSet, LoadedConfig, RawConfigFile, Settings};
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "DATABASES_CONFIG_PATH";

/// Directory holding user- and project-scope configuration.
pub const CONFIG_DIR: &str = ".cursor";

/// Configuration filename looked up in every candidate location.
pub const CONFIG_FILE: &str = "databases.yaml";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration in {}: {}", .path.display(), display_errors(.errors))]
    Validation {
        path: PathBuf,
        errors: Vec<ValidationError>,
    },
}

/// Document syntax, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Resolves and loads the database configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
    candidates: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Loader using the default candidate locations.
    ///
    /// `explicit` comes from the command line; when absent the
    /// `DATABASES_CONFIG_PATH` environment variable is consulted.
    pub fn new(explicit: Option<PathBuf>) -> Self {
        let explicit = explicit.or_else(|| {
            std::env::var_os(CONFIG_PATH_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        });
        Self {
            explicit,
            candidates: default_candidates(),
        }
    }

    /// Loader with custom paths (for testing).
    pub fn with_paths(explicit: Option<PathBuf>, candidates: Vec<PathBuf>) -> Self {
        Self {
            explicit,
            candidates,
        }
    }

    /// Paths considered, in priority order.
    pub fn search_order(&self) -> Vec<PathBuf> {
        match &self.explicit {
            Some(path) => vec![path.clone()],
            None => self.candidates.clone(),
        }
    }

    /// Path of the source that `load` would read.
    pub fn resolve(&self) -> Result<PathBuf, ConfigError> {
        self.read_source().map(|(path, _)| path)
    }

    /// Resolve, read, parse and validate.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let (path, content) = self.read_source()?;
        let (settings, databases) = parse_str(&content, ConfigFormat::from_path(&path), &path)?;
        debug!(
            path = %path.display(),
            databases = databases.len(),
            "Loaded database configuration"
        );
        Ok(LoadedConfig {
            source: path,
            settings,
            databases,
        })
    }

    fn read_source(&self) -> Result<(PathBuf, String), ConfigError> {
        if let Some(path) = &self.explicit {
            if !path.is_file() {
                return Err(ConfigError::NotFound {
                    searched: vec![path.clone()],
                });
            }
            return fs::read_to_string(path)
                .map(|content| (path.clone(), content))
                .map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                });
        }

        for path in &self.candidates {
            if !path.is_file() {
                debug!(path = %path.display(), "No configuration at candidate location");
                continue;
            }
            match fs::read_to_string(path) {
                Ok(content) => return Ok((path.clone(), content)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable configuration file");
                }
            }
        }

        Err(ConfigError::NotFound {
            searched: self.candidates.clone(),
        })
    }
}

/// Load a specific file, bypassing resolution.
pub fn load_path(path: &Path) -> Result<LoadedConfig, ConfigError> {
    ConfigLoader::with_paths(Some(path.to_path_buf()), Vec::new()).load()
}

/// Parse and validate a document. Pure function of its input; `path` is only
/// used for error messages.
pub fn parse_str(
    content: &str,
    format: ConfigFormat,
    path: &Path,
) -> Result<(Settings, ConfigSet), ConfigError> {
    if content.trim().is_empty() {
        return Err(ConfigError::Validation {
            path: path.to_path_buf(),
            errors: vec![ValidationError::MissingDatabases],
        });
    }

    let raw: RawConfigFile = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    }
    .map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })?;

    validate_config(raw).map_err(|errors| ConfigError::Validation {
        path: path.to_path_buf(),
        errors,
    })
}

fn default_candidates() -> Vec<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut candidates = Vec::with_capacity(3);
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(CONFIG_DIR).join(CONFIG_FILE));
    }
    candidates.push(cwd.join(CONFIG_DIR).join(CONFIG_FILE));
    candidates.push(cwd.join(CONFIG_FILE));
    candidates
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::AccessMode;
    use std::time::Duration;

    const TWO_DATABASES: &str = r#"
databases:
  - name: a
    uri: postgres://app@localhost:5432/a
  - name: b
    description: reporting
    uri: postgresql://app@localhost:5432/b
    access_mode: unrestricted
"#;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parses_yaml_with_defaults() {
        let (settings, set) =
            parse_str(TWO_DATABASES, ConfigFormat::Yaml, Path::new("databases.yaml")).unwrap();
        assert_eq!(set.names(), vec!["a", "b"]);
        assert_eq!(set.get("a").unwrap().access_mode, AccessMode::Restricted);
        assert_eq!(set.get("b").unwrap().access_mode, AccessMode::Unrestricted);
        assert_eq!(set.get("b").unwrap().description.as_deref(), Some("reporting"));
        assert_eq!(settings.access.statement_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parses_toml_by_extension() {
        let content = r#"
[pool]
max_connections = 2

[[databases]]
name = "a"
uri = "postgres://localhost/a"
"#;
        let (settings, set) =
            parse_str(content, ConfigFormat::from_path(Path::new("x.toml")), Path::new("x.toml"))
                .unwrap();
        assert_eq!(settings.pool.max_connections, 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_malformed_and_unknown_fields_are_parse_errors() {
        let path = Path::new("databases.yaml");
        assert!(matches!(
            parse_str("databases: [", ConfigFormat::Yaml, path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            parse_str("databases: nope", ConfigFormat::Yaml, path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            parse_str(
                "databases:\n  - name: a\n    uri: postgres://x/a\n    pasword: x\n",
                ConfigFormat::Yaml,
                path
            ),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_are_validation_errors() {
        let content = "databases:\n  - {name: a, uri: 'postgres://x/a'}\n  - {name: a, uri: 'postgres://x/b'}\n";
        match parse_str(content, ConfigFormat::Yaml, Path::new("d.yaml")) {
            Err(ConfigError::Validation { errors, .. }) => {
                assert_eq!(errors, vec![ValidationError::DuplicateName("a".into())]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("home/.cursor/databases.yaml");
        let project = write(dir.path(), "proj/.cursor/databases.yaml", TWO_DATABASES);
        let cwd = write(dir.path(), "proj/databases.yaml", "databases: []\n");

        let loader = ConfigLoader::with_paths(None, vec![user, project.clone(), cwd]);
        assert_eq!(loader.resolve().unwrap(), project);
        assert_eq!(loader.load().unwrap().databases.len(), 2);
    }

    #[test]
    fn test_explicit_override_beats_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = write(dir.path(), "custom.yaml", "databases: []\n");
        let candidate = write(dir.path(), "databases.yaml", TWO_DATABASES);

        let loader = ConfigLoader::with_paths(Some(explicit.clone()), vec![candidate]);
        let loaded = loader.load().unwrap();
        assert_eq!(loaded.source, explicit);
        assert!(loaded.databases.is_empty());
    }

    #[test]
    fn test_missing_explicit_override_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = write(dir.path(), "databases.yaml", TWO_DATABASES);
        let missing = dir.path().join("nope.yaml");

        let loader = ConfigLoader::with_paths(Some(missing.clone()), vec![candidate]);
        match loader.load() {
            Err(ConfigError::NotFound { searched }) => assert_eq!(searched, vec![missing]),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_paths(None, vec![dir.path().join("databases.yaml")]);
        assert!(matches!(loader.load(), Err(ConfigError::NotFound { .. })));
    }
}
