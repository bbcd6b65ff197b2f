//! Boundary with the TUF repository client.
//!
//! Signing, metadata versioning and the TUF file formats belong to the
//! repository client. This module only declares what the trust service needs
//! from it, plus the data exchanged across that boundary.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::gun::{Gun, RoleName};
use crate::passphrase::{PassphraseError, PassphraseRetriever};
use crate::transport::RoundTripper;

/// Failures reported by the repository client.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The remote trust server rejected or failed the request.
    #[error("remote trust server: {0}")]
    Remote(String),
    /// The repository or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation needs a remote server but none is reachable.
    #[error("trust server is offline")]
    Offline,
    /// A key could not be decrypted.
    #[error(transparent)]
    Passphrase(#[from] PassphraseError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Other(String),
}

/// Public key algorithms understood by the trust server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "ecdsa")]
    Ecdsa,
    #[serde(rename = "ecdsa-x509")]
    EcdsaX509,
    #[serde(rename = "rsa")]
    Rsa,
    #[serde(rename = "rsa-x509")]
    RsaX509,
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ecdsa => "ecdsa",
            KeyAlgorithm::EcdsaX509 => "ecdsa-x509",
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::RsaX509 => "rsa-x509",
            KeyAlgorithm::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public half of a signing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: String,
    pub algorithm: KeyAlgorithm,
    #[serde(with = "crate::keys::base64_bytes")]
    pub public: Vec<u8>,
}

impl PublicKey {
    /// Builds a key whose id is derived from its algorithm and bytes.
    pub fn new(algorithm: KeyAlgorithm, public: Vec<u8>) -> Self {
        let id = key_id(algorithm, &public);
        Self {
            id,
            algorithm,
            public,
        }
    }
}

/// Hex SHA-256 of the canonical JSON form of a public key.
///
/// The canonical form has sorted keys, no whitespace and a null private
/// part: `{"keytype":..,"keyval":{"private":null,"public":<base64>}}`.
pub fn key_id(algorithm: KeyAlgorithm, public: &[u8]) -> String {
    let canonical = format!(
        r#"{{"keytype":"{}","keyval":{{"private":null,"public":"{}"}}}}"#,
        algorithm.as_str(),
        STANDARD.encode(public)
    );
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Delegation or canonical role as recorded in targets metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: RoleName,
    #[serde(default)]
    pub key_ids: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub threshold: u32,
}

/// Full set of signed metadata for a repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TufMetadata {
    pub root: Value,
    /// Top-level targets plus every delegated targets document, by role.
    pub targets: BTreeMap<RoleName, Value>,
    pub snapshot: Value,
    pub timestamp: Value,
}

/// How the repository client decides which root certificates to trust.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPinConfig {
    /// CA bundle path by GUN prefix.
    pub ca: HashMap<String, String>,
    /// Pinned certificate ids by GUN.
    pub certs: HashMap<String, Vec<String>>,
    /// Refuse trust-on-first-use for unpinned repositories.
    pub disable_tofu: bool,
}

/// Parameters for opening a repository handle.
#[derive(Clone)]
pub struct OpenRequest {
    pub trust_dir: PathBuf,
    pub gun: Gun,
    pub remote_url: String,
    /// `None` opens the repository offline.
    pub transport: Option<Arc<dyn RoundTripper>>,
    pub retriever: Arc<dyn PassphraseRetriever>,
    pub trust_pinning: TrustPinConfig,
}

/// Parameters for deleting local and optionally remote trust data.
#[derive(Clone)]
pub struct DeleteRequest {
    pub trust_dir: PathBuf,
    pub gun: Gun,
    pub remote_url: String,
    pub transport: Option<Arc<dyn RoundTripper>>,
    pub delete_remote: bool,
}

/// Parameters for loading the full signed metadata of a repository.
#[derive(Clone)]
pub struct LoadOptions {
    pub gun: Gun,
    pub trust_pinning: TrustPinConfig,
    pub transport: Option<Arc<dyn RoundTripper>>,
}

/// Entry point of the repository client.
#[async_trait]
pub trait TrustRepositoryClient: Send + Sync {
    async fn open(&self, request: OpenRequest) -> Result<Arc<dyn Repository>, RepositoryError>;

    async fn delete_trust_data(&self, request: DeleteRequest) -> Result<(), RepositoryError>;

    async fn load_full_repo(
        &self,
        repository: &dyn Repository,
        options: LoadOptions,
    ) -> Result<TufMetadata, RepositoryError>;
}

/// Handle on one repository.
///
/// Mutations are staged locally until [`Repository::publish`] pushes them to
/// the trust server.
#[async_trait]
pub trait Repository: Send + Sync {
    fn gun(&self) -> &Gun;

    async fn initialize_with_certificate(
        &self,
        root_key_ids: Vec<String>,
        root_certs: Vec<PublicKey>,
    ) -> Result<(), RepositoryError>;

    async fn add_delegation(
        &self,
        role: &RoleName,
        keys: &[PublicKey],
        paths: &[String],
    ) -> Result<(), RepositoryError>;

    async fn remove_delegation_keys(
        &self,
        role: &RoleName,
        key_ids: &[String],
    ) -> Result<(), RepositoryError>;

    async fn get_delegation_roles(&self) -> Result<Vec<Role>, RepositoryError>;

    fn crypto_service(&self) -> Arc<dyn CryptoService>;

    async fn publish(&self) -> Result<(), RepositoryError>;
}

/// Private key operations of a repository handle.
#[async_trait]
pub trait CryptoService: Send + Sync {
    fn list_keys(&self, role: &RoleName) -> Vec<String>;

    /// Decrypts `pem` with the repository's passphrase retriever and stores
    /// it for `role`. Returns the id of the imported key.
    async fn import_private_key(
        &self,
        role: &RoleName,
        gun: &Gun,
        pem: &[u8],
    ) -> Result<String, RepositoryError>;

    fn get_private_key_role(&self, key_id: &str) -> Result<RoleName, RepositoryError>;
}
