//! Secrets backends for key passphrases.
//!
//! Passphrases for newly created keys are random passwords. They can be
//! generated locally with [`DefaultPasswordGenerator`] or by Vault, and are
//! stored in Vault by [`vault::VaultCredentialsManager`], which also serves
//! them back to the repository client as a passphrase retriever.

pub mod vault;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LOWER_LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER_LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SYMBOLS: &str = "~!@#$%^&*()_+`-={}|[]\\:\"<>?,./";

const DEFAULT_LENGTH: usize = 64;
const DEFAULT_DIGITS: usize = 10;
const DEFAULT_SYMBOLS: usize = 10;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("invalid Vault address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Vault request to {path} failed with status {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },
    #[error("Vault request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read secret, data in unexpected format: {0}")]
    UnexpectedFormat(String),
    #[error("invalid password options: {0}")]
    InvalidOptions(String),
}

/// Produces new random passwords.
#[async_trait]
pub trait PasswordGenerator: Send + Sync {
    async fn generate(&self) -> Result<String, SecretsError>;
}

/// Password shape. Unset fields take the generator's defaults; Vault
/// receives only the fields that are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digits: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_uppercase: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_repeat: Option<bool>,
}

/// Generates passwords locally with the thread RNG.
///
/// Defaults: 64 characters including 10 digits and 10 symbols, uppercase
/// letters and repeated characters allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPasswordGenerator {
    length: usize,
    digits: usize,
    symbols: usize,
    allow_uppercase: bool,
    allow_repeat: bool,
}

impl Default for DefaultPasswordGenerator {
    fn default() -> Self {
        Self::new(PasswordOptions::default())
    }
}

impl DefaultPasswordGenerator {
    pub fn new(options: PasswordOptions) -> Self {
        Self {
            length: options.length.unwrap_or(DEFAULT_LENGTH),
            digits: options.digits.unwrap_or(DEFAULT_DIGITS),
            symbols: options.symbols.unwrap_or(DEFAULT_SYMBOLS),
            allow_uppercase: options.allow_uppercase.unwrap_or(true),
            allow_repeat: options.allow_repeat.unwrap_or(true),
        }
    }

    fn generate_with<R: Rng>(&self, rng: &mut R) -> Result<String, SecretsError> {
        let letters = self
            .length
            .checked_sub(self.digits + self.symbols)
            .ok_or_else(|| {
                SecretsError::InvalidOptions("digits and symbols exceed the length".to_string())
            })?;
        let mut alphabet: Vec<char> = LOWER_LETTERS.chars().collect();
        if self.allow_uppercase {
            alphabet.extend(UPPER_LETTERS.chars());
        }
        let digits: Vec<char> = DIGITS.chars().collect();
        let symbols: Vec<char> = SYMBOLS.chars().collect();

        let mut password = Vec::with_capacity(self.length);
        for (pool, count, name) in [
            (&alphabet, letters, "letters"),
            (&digits, self.digits, "digits"),
            (&symbols, self.symbols, "symbols"),
        ] {
            if self.allow_repeat {
                for _ in 0..count {
                    if let Some(c) = pool.choose(rng) {
                        password.push(*c);
                    }
                }
            } else {
                if count > pool.len() {
                    return Err(SecretsError::InvalidOptions(format!(
                        "not enough unique {name} for {count} characters"
                    )));
                }
                password.extend(pool.choose_multiple(rng, count).copied());
            }
        }
        password.shuffle(rng);
        Ok(password.into_iter().collect())
    }
}

#[async_trait]
impl PasswordGenerator for DefaultPasswordGenerator {
    async fn generate(&self) -> Result<String, SecretsError> {
        self.generate_with(&mut rand::thread_rng())
    }
}
