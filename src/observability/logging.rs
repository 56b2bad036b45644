//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber once per process
//! - Pick the filter from `RUST_LOG`, falling back to the configured level
//! - Switch between pretty and JSON output
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - Initialization is idempotent so tests and binaries can both call it

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global subscriber from the observability settings.
///
/// Logs go to stderr so a stdio tool transport can own stdout.
pub fn init_logging(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

        let result = match config.log_format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init(),
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

fn default_directive(level: &str) -> String {
    format!("postgres_multi_mcp={level},tower_http={level},sqlx=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        let config = ObservabilityConfig::default();
        init_logging(&config);
        init_logging(&config);
    }

    #[test]
    fn default_directive_quiets_sqlx() {
        assert_eq!(
            default_directive("debug"),
            "postgres_multi_mcp=debug,tower_http=debug,sqlx=warn"
        );
    }
}
