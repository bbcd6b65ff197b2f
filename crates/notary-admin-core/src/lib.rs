//! Public entry points for the notary admin core crate.
//!
//! The crate administers Notary/TUF trust repositories: it validates
//! commands, negotiates authenticated transports to the trust server,
//! enumerates the keys of the local trust directory and resolves
//! delegations. The repository client itself is a collaborator supplied by
//! the host through [`TrustRepositoryClient`].

pub mod certs;
pub mod commands;
pub mod config;
pub mod delegation;
pub mod error;
pub mod gun;
pub mod keys;
pub mod keystore;
pub mod logging;
pub mod passphrase;
pub mod pipeline;
pub mod repository;
pub mod secrets;
pub mod service;
pub mod transport;

pub use commands::{
    AddDelegationCommand, CreateRepoCommand, DeleteRepositoryCommand, RemoveDelegationCommand,
    TargetCommand,
};
pub use config::{ConfigError, NotaryConfig, RemoteServerConfig, TrustPinningConfig};
pub use error::{Error, ErrorKind};
pub use gun::{sanitize_gun, Gun, RoleName};
pub use keys::{Key, KeyData, KeyFilter, KeyInfo};
pub use keystore::{FileKeyStore, KeyStore, KeyStoreError, KeyStoreFactory, MemoryKeyStore};
pub use passphrase::{EnvPassphraseRetriever, Passphrase, PassphraseError, PassphraseRetriever};
pub use pipeline::KeyStream;
pub use repository::{
    CryptoService, KeyAlgorithm, PublicKey, Repository, RepositoryError, Role, TrustPinConfig,
    TrustRepositoryClient, TufMetadata,
};
pub use secrets::vault::{VaultClient, VaultConfig, VaultCredentialsManager};
pub use secrets::{PasswordGenerator, SecretsError};
pub use service::TrustService;
pub use transport::credentials::CredentialStore;
pub use transport::{build_transport, Permission, RoundTripper, TransportError};
