//! Tracing subscriber setup for binaries embedding the trust service.

use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Log level used when the caller does not supply one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not parse log level {level:?}: {reason}")]
    InvalidLevel { level: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Builds the filter applied to the global subscriber. HTTP stack internals
/// are always silenced.
pub fn env_filter(log_level: &str) -> Result<EnvFilter, LoggingError> {
    let level = match log_level.trim() {
        "" => DEFAULT_LOG_LEVEL,
        level => level,
    };
    EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,reqwest=off,{level}")).map_err(|err| {
        LoggingError::InvalidLevel {
            level: log_level.to_string(),
            reason: err.to_string(),
        }
    })
}

/// Installs a fmt subscriber filtered at `log_level` as the global default.
pub fn init(log_level: &str) -> Result<(), LoggingError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level)?)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LoggingError::AlreadyInstalled)?;
    debug!("Logging subsystem enabled");
    Ok(())
}
