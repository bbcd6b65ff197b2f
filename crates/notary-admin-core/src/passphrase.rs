//! Passphrases for decrypting and encrypting private keys.
//!
//! The repository client asks a [`PassphraseRetriever`] whenever it needs to
//! unlock a key. [`EnvPassphraseRetriever`] answers from `NOTARY_*_PASSPHRASE`
//! environment variables and defers to an optional fallback (for example an
//! interactive prompt owned by the embedding binary).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::gun::{RoleName, ROOT_ROLE, SNAPSHOT_ROLE, TARGETS_ROLE};

pub const ROOT_PASSPHRASE_ENV: &str = "NOTARY_ROOT_PASSPHRASE";
pub const TARGETS_PASSPHRASE_ENV: &str = "NOTARY_TARGETS_PASSPHRASE";
pub const SNAPSHOT_PASSPHRASE_ENV: &str = "NOTARY_SNAPSHOT_PASSPHRASE";
pub const DELEGATION_PASSPHRASE_ENV: &str = "NOTARY_DELEGATION_PASSPHRASE";

const DELEGATION_ALIAS: &str = "delegation";

/// A passphrase and whether the caller should stop retrying if it fails.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase {
    pub passphrase: String,
    pub give_up: bool,
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passphrase")
            .field("passphrase", &"<redacted>")
            .field("give_up", &self.give_up)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum PassphraseError {
    /// No source could supply a passphrase for the alias.
    #[error("no passphrase available for {alias}")]
    Unavailable { alias: String },
    /// A passphrase backend failed.
    #[error("failed to get credential: {message}")]
    Backend { message: String, give_up: bool },
}

impl PassphraseError {
    /// Whether the caller should stop asking.
    pub fn give_up(&self) -> bool {
        match self {
            PassphraseError::Unavailable { .. } => true,
            PassphraseError::Backend { give_up, .. } => *give_up,
        }
    }
}

/// Supplies passphrases for private keys.
#[async_trait]
pub trait PassphraseRetriever: Send + Sync {
    /// `key_name` identifies the key, `alias` is its role (or a custom
    /// alias), `create_new` is set when the key is being generated and
    /// `attempts` counts the tries so far, starting at 0.
    async fn retrieve(
        &self,
        key_name: &str,
        alias: &str,
        create_new: bool,
        attempts: u32,
    ) -> Result<Passphrase, PassphraseError>;
}

/// Answers from environment variables, then from an optional fallback.
#[derive(Clone, Default)]
pub struct EnvPassphraseRetriever {
    by_alias: HashMap<String, String>,
    fallback: Option<Arc<dyn PassphraseRetriever>>,
}

impl EnvPassphraseRetriever {
    pub fn from_os_env() -> Self {
        Self::from_env_iter(std::env::vars())
    }

    /// Builds the retriever from an explicit variable listing.
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut by_alias = HashMap::new();
        for (name, value) in iter {
            let name: String = name.into();
            let alias = match name.as_str() {
                ROOT_PASSPHRASE_ENV => ROOT_ROLE,
                TARGETS_PASSPHRASE_ENV => TARGETS_ROLE,
                SNAPSHOT_PASSPHRASE_ENV => SNAPSHOT_ROLE,
                DELEGATION_PASSPHRASE_ENV => DELEGATION_ALIAS,
                _ => continue,
            };
            let value: String = value.into();
            if !value.is_empty() {
                by_alias.insert(alias.to_string(), value);
            }
        }
        Self {
            by_alias,
            fallback: None,
        }
    }

    /// Consults `fallback` when no variable matches.
    pub fn with_fallback(mut self, fallback: Arc<dyn PassphraseRetriever>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn lookup(&self, alias: &str) -> Option<&str> {
        if let Some(value) = self.by_alias.get(alias) {
            return Some(value.as_str());
        }
        // Delegation keys may be shared across repositories under custom
        // aliases, but base roles never fall back to the delegation value.
        if RoleName::new(alias).is_base_role() {
            return None;
        }
        self.by_alias.get(DELEGATION_ALIAS).map(String::as_str)
    }
}

#[async_trait]
impl PassphraseRetriever for EnvPassphraseRetriever {
    async fn retrieve(
        &self,
        key_name: &str,
        alias: &str,
        create_new: bool,
        attempts: u32,
    ) -> Result<Passphrase, PassphraseError> {
        if let Some(value) = self.lookup(alias) {
            debug!(key_name, alias, attempts, "passphrase taken from environment");
            return Ok(Passphrase {
                passphrase: value.to_string(),
                give_up: attempts > 1,
            });
        }
        match &self.fallback {
            Some(fallback) => {
                fallback
                    .retrieve(key_name, alias, create_new, attempts)
                    .await
            }
            None => Err(PassphraseError::Unavailable {
                alias: alias.to_string(),
            }),
        }
    }
}
