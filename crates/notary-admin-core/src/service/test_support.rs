//! Shared fixtures for trust service tests.
//!
//! The fake repository client records every collaborator call as a short
//! string so tests can assert on ordering without inspecting internals.

#![cfg(test)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use httptest::matchers::request;
use httptest::responders::status_code;
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::TempDir;

use super::TrustService;
use crate::config::{NotaryConfig, RemoteServerConfig};
use crate::gun::{Gun, RoleName};
use crate::keys::KeyInfo;
use crate::keystore::{KeyStore, KeyStoreError, KeyStoreFactory, MemoryKeyStore};
use crate::passphrase::EnvPassphraseRetriever;
use crate::repository::{
    CryptoService, DeleteRequest, LoadOptions, OpenRequest, PublicKey, Repository,
    RepositoryError, Role, TrustPinConfig, TrustRepositoryClient, TufMetadata,
};
use crate::transport::credentials::CredentialStore;

/// Server address nothing listens on.
pub(crate) const OFFLINE_URL: &str = "http://127.0.0.1:1";
pub(crate) const SAMPLE_GUN: &str = "example.com/app";
pub(crate) const ROOT_KEY_ID: &str = "5e4aa0a4b3c1f8c2d9e7f6a5b4c3d2e1f0a9b8c7d6e5f4a3b2c1d0e9f8a7b6c5";
pub(crate) const TARGETS_KEY_ID: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0";

/// One `open` call as seen by the fake client.
#[derive(Debug, Clone)]
pub(crate) struct OpenRecord {
    pub gun: Gun,
    pub online: bool,
    pub trust_pinning: TrustPinConfig,
}

#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub calls: Vec<String>,
    pub opens: Vec<OpenRecord>,
    pub root_certs: Vec<PublicKey>,
    pub load_pinning: Option<TrustPinConfig>,
}

/// Crypto service over an in-memory role to key id table.
#[derive(Debug, Default)]
pub(crate) struct FakeCrypto {
    keys: Mutex<HashMap<RoleName, Vec<String>>>,
    imports: Mutex<Vec<(RoleName, Gun, Vec<u8>)>>,
}

impl FakeCrypto {
    pub fn with_key(self, role: RoleName, key_id: &str) -> Self {
        self.keys
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push(key_id.to_string());
        self
    }

    pub fn imports(&self) -> Vec<(RoleName, Gun, Vec<u8>)> {
        self.imports.lock().unwrap().clone()
    }
}

#[async_trait]
impl CryptoService for FakeCrypto {
    fn list_keys(&self, role: &RoleName) -> Vec<String> {
        self.keys
            .lock()
            .unwrap()
            .get(role)
            .cloned()
            .unwrap_or_default()
    }

    async fn import_private_key(
        &self,
        role: &RoleName,
        gun: &Gun,
        pem: &[u8],
    ) -> Result<String, RepositoryError> {
        let mut imports = self.imports.lock().unwrap();
        imports.push((role.clone(), gun.clone(), pem.to_vec()));
        let key_id = format!("imported{}", imports.len());
        self.keys
            .lock()
            .unwrap()
            .entry(role.clone())
            .or_default()
            .push(key_id.clone());
        Ok(key_id)
    }

    fn get_private_key_role(&self, key_id: &str) -> Result<RoleName, RepositoryError> {
        self.keys
            .lock()
            .unwrap()
            .iter()
            .find(|(_, ids)| ids.iter().any(|id| id == key_id))
            .map(|(role, _)| role.clone())
            .ok_or_else(|| RepositoryError::NotFound(key_id.to_string()))
    }
}

/// Which collaborator calls should fail.
#[derive(Debug, Clone, Default)]
pub(crate) struct Failures {
    pub open: bool,
    pub publish: bool,
    pub add_delegation: bool,
}

/// Repository client recording every call.
pub(crate) struct FakeTrustClient {
    pub recorder: Arc<Mutex<Recorder>>,
    pub crypto: Arc<FakeCrypto>,
    pub roles: Vec<Role>,
    pub metadata: TufMetadata,
    pub failures: Failures,
}

impl Default for FakeTrustClient {
    fn default() -> Self {
        Self::new(FakeCrypto::default())
    }
}

impl FakeTrustClient {
    pub fn new(crypto: FakeCrypto) -> Self {
        Self {
            recorder: Arc::new(Mutex::new(Recorder::default())),
            crypto: Arc::new(crypto),
            roles: Vec::new(),
            metadata: sample_metadata(),
            failures: Failures::default(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_failures(mut self, failures: Failures) -> Self {
        self.failures = failures;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorder.lock().unwrap().calls.clone()
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.recorder.lock().unwrap().opens.clone()
    }

    pub fn root_certs(&self) -> Vec<PublicKey> {
        self.recorder.lock().unwrap().root_certs.clone()
    }

    pub fn load_pinning(&self) -> Option<TrustPinConfig> {
        self.recorder.lock().unwrap().load_pinning.clone()
    }

    fn record(&self, call: String) {
        self.recorder.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl TrustRepositoryClient for FakeTrustClient {
    async fn open(&self, request: OpenRequest) -> Result<Arc<dyn Repository>, RepositoryError> {
        self.recorder.lock().unwrap().opens.push(OpenRecord {
            gun: request.gun.clone(),
            online: request.transport.is_some(),
            trust_pinning: request.trust_pinning.clone(),
        });
        if self.failures.open {
            return Err(RepositoryError::Other("open refused".to_string()));
        }
        Ok(Arc::new(FakeRepository {
            gun: request.gun,
            recorder: self.recorder.clone(),
            crypto: self.crypto.clone(),
            roles: self.roles.clone(),
            failures: self.failures.clone(),
        }))
    }

    async fn delete_trust_data(&self, request: DeleteRequest) -> Result<(), RepositoryError> {
        self.record(format!(
            "delete:{}:remote={}:online={}",
            request.gun,
            request.delete_remote,
            request.transport.is_some()
        ));
        Ok(())
    }

    async fn load_full_repo(
        &self,
        repository: &dyn Repository,
        options: LoadOptions,
    ) -> Result<TufMetadata, RepositoryError> {
        self.record(format!("load:{}", repository.gun()));
        self.recorder.lock().unwrap().load_pinning = Some(options.trust_pinning);
        Ok(self.metadata.clone())
    }
}

struct FakeRepository {
    gun: Gun,
    recorder: Arc<Mutex<Recorder>>,
    crypto: Arc<FakeCrypto>,
    roles: Vec<Role>,
    failures: Failures,
}

impl FakeRepository {
    fn record(&self, call: String) {
        self.recorder.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Repository for FakeRepository {
    fn gun(&self) -> &Gun {
        &self.gun
    }

    async fn initialize_with_certificate(
        &self,
        root_key_ids: Vec<String>,
        root_certs: Vec<PublicKey>,
    ) -> Result<(), RepositoryError> {
        self.record(format!(
            "initialize:[{}]:certs={}",
            root_key_ids.join(","),
            root_certs.len()
        ));
        self.recorder.lock().unwrap().root_certs = root_certs;
        Ok(())
    }

    async fn add_delegation(
        &self,
        role: &RoleName,
        keys: &[PublicKey],
        paths: &[String],
    ) -> Result<(), RepositoryError> {
        if self.failures.add_delegation {
            return Err(RepositoryError::InvalidInput("bad delegation".to_string()));
        }
        self.record(format!(
            "add_delegation:{role}:keys={}:paths={}",
            keys.len(),
            paths.join(",")
        ));
        Ok(())
    }

    async fn remove_delegation_keys(
        &self,
        role: &RoleName,
        key_ids: &[String],
    ) -> Result<(), RepositoryError> {
        self.record(format!("remove_delegation:{role}:{}", key_ids.join(",")));
        Ok(())
    }

    async fn get_delegation_roles(&self) -> Result<Vec<Role>, RepositoryError> {
        self.record(format!("delegation_roles:{}", self.gun));
        Ok(self.roles.clone())
    }

    fn crypto_service(&self) -> Arc<dyn CryptoService> {
        self.crypto.clone()
    }

    async fn publish(&self) -> Result<(), RepositoryError> {
        self.record(format!("publish:{}", self.gun));
        if self.failures.publish {
            return Err(RepositoryError::Remote("503 Service Unavailable".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn sample_metadata() -> TufMetadata {
    let mut metadata = TufMetadata {
        root: json!({"signed": {"_type": "root", "version": 1}}),
        snapshot: json!({"signed": {"_type": "snapshot", "version": 1}}),
        timestamp: json!({"signed": {"_type": "timestamp", "version": 1}}),
        ..TufMetadata::default()
    };
    metadata.targets.insert(
        RoleName::targets(),
        json!({"signed": {"_type": "targets", "version": 1}}),
    );
    metadata
}

pub(crate) fn role(name: &str, key_ids: &[&str]) -> Role {
    Role {
        name: RoleName::new(name),
        key_ids: key_ids.iter().map(|id| id.to_string()).collect(),
        paths: vec![String::new()],
        threshold: 1,
    }
}

/// Configuration pointing at `url` with a pinned certificate for
/// [`SAMPLE_GUN`].
pub(crate) fn config(trust_dir: &Path, url: &str) -> NotaryConfig {
    let mut config = NotaryConfig {
        trust_dir: trust_dir.to_path_buf(),
        remote_server: RemoteServerConfig {
            url: url.to_string(),
            ..RemoteServerConfig::default()
        },
        ..NotaryConfig::default()
    };
    config
        .trust_pinning
        .certs
        .insert(SAMPLE_GUN.to_string(), json!(["pinned-cert-id"]));
    config
}

/// Server whose probe endpoint always answers `200 OK`.
pub(crate) fn online_server() -> Server {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/"))
            .times(0..)
            .respond_with(status_code(200)),
    );
    server
}

/// Server that fails the test if it is probed at all.
pub(crate) fn unprobed_server() -> Server {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/"))
            .times(0)
            .respond_with(status_code(200)),
    );
    server
}

/// Key store factory over a shared in-memory store that counts opens.
pub(crate) fn memory_factory(store: Arc<MemoryKeyStore>, opens: Arc<AtomicUsize>) -> KeyStoreFactory {
    Arc::new(move || -> Result<Arc<dyn KeyStore>, KeyStoreError> {
        opens.fetch_add(1, Ordering::SeqCst);
        Ok(store.clone())
    })
}

pub(crate) fn sample_store() -> MemoryKeyStore {
    MemoryKeyStore::with_keys([
        (ROOT_KEY_ID.to_string(), KeyInfo::new(RoleName::root(), "")),
        (
            TARGETS_KEY_ID.to_string(),
            KeyInfo::new(RoleName::targets(), SAMPLE_GUN),
        ),
        (
            "abc123d4567890".to_string(),
            KeyInfo::new(RoleName::targets(), "example.com/other"),
        ),
        (
            "snap0123456789".to_string(),
            KeyInfo::new(RoleName::snapshot(), SAMPLE_GUN),
        ),
    ])
}

/// Everything a service test needs, kept alive together.
pub(crate) struct Harness {
    pub service: TrustService,
    pub client: Arc<FakeTrustClient>,
    pub store_opens: Arc<AtomicUsize>,
    pub trust_dir: TempDir,
}

impl Harness {
    pub fn new(url: &str, client: FakeTrustClient) -> Self {
        Self::with_store(url, client, sample_store())
    }

    pub fn with_store(url: &str, client: FakeTrustClient, store: MemoryKeyStore) -> Self {
        let trust_dir = TempDir::new().unwrap();
        let client = Arc::new(client);
        let store = Arc::new(store);
        let store_opens = Arc::new(AtomicUsize::new(0));
        let service = TrustService::new(
            config(trust_dir.path(), url),
            memory_factory(store, store_opens.clone()),
            client.clone(),
            Arc::new(EnvPassphraseRetriever::default()),
        )
        .with_credentials(CredentialStore::anonymous());
        Self {
            service,
            client,
            store_opens,
            trust_dir,
        }
    }

    pub fn store_opens(&self) -> usize {
        self.store_opens.load(Ordering::SeqCst)
    }

    /// Writes `<trust_dir>/private/<key_id>.key`.
    pub fn write_private_key(&self, key_id: &str, contents: &[u8]) -> PathBuf {
        let path = crate::keystore::private_key_path(self.trust_dir.path(), key_id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }
}

/// Path of a file under `tests/fixtures`.
pub(crate) fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}
