//! Error taxonomy for trust operations.
//!
//! Every failure surfaced by the crate is an [`Error`]. Callers branch on
//! [`Error::kind`] rather than on message content: validation problems are
//! reported before any I/O, collaborator failures carry the operation that
//! failed, and an auto-publish failure after a successful local mutation is a
//! distinct partial-failure state.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::gun::Gun;
use crate::keystore::KeyStoreError;
use crate::repository::RepositoryError;
use crate::transport::TransportError;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input was rejected before any I/O took place.
    Validation,
    /// Local configuration (TLS material, URLs, trust pinning) is unusable.
    Configuration,
    /// The trust repository collaborator reported a failure.
    Collaborator,
    /// The local key store could not be opened or queried.
    KeyStore,
    /// Reading or writing a local file failed.
    Io,
    /// The HTTP transport failed outside of the offline rule.
    Transport,
    /// The local mutation succeeded but publishing it did not.
    PartialFailure,
    /// The caller cancelled the operation.
    Cancelled,
}

/// Errors returned by the trust operations service.
#[derive(Debug, Error)]
pub enum Error {
    /// No GUN was given, or it was blank after sanitisation.
    #[error("must specify a GUN")]
    GunMandatory,
    /// A delegation was requested without public keys or paths.
    #[error("public key(s) and path(s) are required")]
    PublicKeysAndPathsMandatory,
    /// An identifier was too short or empty.
    #[error("invalid id: {0}")]
    InvalidIdentifier(String),
    /// The stored configuration could not be converted for the collaborator.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A root key file was not encrypted.
    #[error("root key file {} must be encrypted", .0.display())]
    RootKeyNotEncrypted(PathBuf),
    /// A key or certificate file did not contain the expected PEM material.
    #[error("invalid PEM material in {}: {reason}", path.display())]
    InvalidPem { path: PathBuf, reason: String },
    /// Local file access failed.
    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The local key store failed.
    #[error("failed to retrieve keys: {0}")]
    KeyStore(#[from] KeyStoreError),
    /// The trust repository collaborator failed while performing `op`.
    #[error("failed to {op}: {source}")]
    Repository {
        op: &'static str,
        #[source]
        source: RepositoryError,
    },
    /// The HTTP transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Changes were applied locally but could not be published.
    #[error("changes for {gun} were applied locally but publishing failed: {source}")]
    Publish {
        gun: Gun,
        #[source]
        source: Box<Error>,
    },
    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the classification used by callers to decide how to react.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::GunMandatory
            | Error::PublicKeysAndPathsMandatory
            | Error::InvalidIdentifier(_) => ErrorKind::Validation,
            Error::Transport(err) if err.is_configuration() => ErrorKind::Configuration,
            Error::Config(_)
            | Error::RootKeyNotEncrypted(_)
            | Error::InvalidPem { .. } => ErrorKind::Configuration,
            Error::Io { .. } => ErrorKind::Io,
            Error::KeyStore(_) => ErrorKind::KeyStore,
            Error::Repository { .. } => ErrorKind::Collaborator,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Publish { .. } => ErrorKind::PartialFailure,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Wraps a collaborator failure with the operation that produced it.
    pub(crate) fn repository(op: &'static str) -> impl FnOnce(RepositoryError) -> Error {
        move |source| Error::Repository { op, source }
    }

    /// Wraps an I/O failure with the file it concerned.
    pub(crate) fn io(
        context: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io {
            context,
            path,
            source,
        }
    }
}
