//! Caller-visible tool errors.
//!
//! Every failure a tool call can produce is one of these variants. They are
//! serialized with an `error_kind` tag plus a human readable `message`, so a
//! client can tell bad input (`not_found`, `invalid_arguments`) apart from
//! policy (`access_denied`) and database trouble (`unavailable`, `timeout`,
//! `execution`).

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;
use crate::guard::GuardError;
use crate::pool::RegistryError;

#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "error_kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("database `{database_name}` not found")]
    NotFound {
        database_name: String,
        available: Vec<String>,
    },

    #[error("database `{database_name}` is unavailable: {reason}")]
    Unavailable {
        database_name: String,
        reason: String,
    },

    #[error("access denied on `{database_name}`: {reason}")]
    AccessDenied {
        database_name: String,
        statement_summary: String,
        reason: String,
    },

    #[error("{scope} timeout of {timeout_ms}ms exceeded")]
    Timeout {
        #[serde(skip_serializing_if = "Option::is_none")]
        database_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        statement_summary: Option<String>,
        scope: &'static str,
        timeout_ms: u64,
    },

    #[error("unknown tool `{tool}`")]
    UnknownTool { tool: String },

    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("tool execution failed: {reason}")]
    Execution {
        #[serde(skip_serializing_if = "Option::is_none")]
        database_name: Option<String>,
        reason: String,
    },
}

impl ToolError {
    /// Stable label used in responses, logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::NotFound { .. } => "not_found",
            ToolError::Unavailable { .. } => "unavailable",
            ToolError::AccessDenied { .. } => "access_denied",
            ToolError::Timeout { .. } => "timeout",
            ToolError::UnknownTool { .. } => "unknown_tool",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::Config { .. } => "config",
            ToolError::Execution { .. } => "execution",
        }
    }

    /// JSON payload: the tagged fields plus `message`.
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "error_kind": self.kind() })
        });
        if let Value::Object(map) = &mut payload {
            map.insert("message".to_string(), Value::String(self.to_string()));
        }
        payload
    }

    pub fn invalid_arguments(tool: &str, reason: impl ToString) -> Self {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<RegistryError> for ToolError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { name, available } => ToolError::NotFound {
                database_name: name,
                available,
            },
            RegistryError::Unavailable { name, reason } => ToolError::Unavailable {
                database_name: name,
                reason,
            },
            RegistryError::NoUsableDatabase { .. } => ToolError::Execution {
                database_name: None,
                reason: err.to_string(),
            },
        }
    }
}

impl From<GuardError> for ToolError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::AccessDenied {
                database,
                statement_summary,
                reason,
            } => ToolError::AccessDenied {
                database_name: database,
                statement_summary,
                reason,
            },
            GuardError::Timeout {
                database,
                statement_summary,
                timeout,
            } => ToolError::Timeout {
                database_name: Some(database),
                statement_summary: Some(statement_summary),
                scope: "statement",
                timeout_ms: timeout.as_millis() as u64,
            },
            // The handle was retired between lookup and lease.
            GuardError::Retired { database } => ToolError::NotFound {
                database_name: database,
                available: Vec::new(),
            },
            GuardError::Acquire { database, reason } => ToolError::Unavailable {
                database_name: database,
                reason,
            },
            GuardError::InvalidParameters { reason } => ToolError::Execution {
                database_name: None,
                reason,
            },
            GuardError::Interrupted { ref database } | GuardError::Database { ref database, .. } => {
                ToolError::Execution {
                    database_name: Some(database.clone()),
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        ToolError::Config {
            reason: err.to_string(),
        }
    }
}
