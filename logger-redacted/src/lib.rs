//! Structured logging with member identity redaction
//!
//! Authorization services log about members constantly, and member
//! identities carry e-mail addresses. This crate sets up `tracing` output and
//! provides [`MemberRedactor`] so identities can be logged as correlatable
//! hashes instead of raw addresses.
//!
//! # Redaction
//!
//! - **Member identities**: `user:alice@example.com` → `user:[q2Fh1x9K]`
//! - **Bare e-mail addresses**: `bob@example.com` → `EMAIL[Zr8wYb3c]`
//! - **Custom patterns**: configurable regex replacements
//!
//! # Example
//!
//! ```rust,no_run
//! use logger_redacted::{init_tracing, LoggerConfig, MemberRedactor};
//! use tracing::info;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::default();
//!     init_tracing(&config)?;
//!
//!     let redactor = MemberRedactor::from_logger_config(&config);
//!     info!(member = %redactor.redact_member("user:alice@example.com"), "Granted role");
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod redactor;

pub use config::*;
pub use redactor::*;

use thiserror::Error;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Failures installing the global subscriber
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_level`.
pub fn init_tracing(config: &LoggerConfig) -> Result<(), LoggerError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| LoggerError::InvalidFilter(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_output {
        registry
            .with(fmt::layer().with_target(false).with_ansi(false).json())
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))?;
    debug!(
        json_output = config.json_output,
        redaction_enabled = config.redaction_enabled,
        "Tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_only_once() {
        let config = LoggerConfig {
            log_level: "debug".to_string(),
            ..Default::default()
        };

        // Other tests in this binary may have installed it first.
        let _ = init_tracing(&config);
        assert!(matches!(
            init_tracing(&config),
            Err(LoggerError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggerConfig {
            log_level: "iam_policy=loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(init_tracing(&config), Err(LoggerError::InvalidFilter(_))));
    }
}
