//! Collaborators shared by the trust service integration tests.
//!
//! [`ServerBackedClient`] stands in for a real repository client: every
//! online operation goes through the transport negotiated by the service, so
//! the tests observe authentication against a scripted trust server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use notary_admin_core::keystore::private_key_path;
use notary_admin_core::repository::{DeleteRequest, LoadOptions, OpenRequest};
use notary_admin_core::{
    CryptoService, Gun, PublicKey, Repository, RepositoryError, Role, RoleName, RoundTripper,
    TrustRepositoryClient, TufMetadata,
};
use reqwest::{Body, Method, Request, Url};
use serde::Deserialize;

pub const GUN: &str = "example.com/app";
pub const ROOT_KEY_ID: &str = "9d1c0b3a4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9";
pub const TARGETS_KEY_ID: &str = "7a8b9c0d1e2f30415263748596a7b8c9d0e1f2031425364758697a8b9c0d1e2f";

/// Writes a tagged private key file the way the notary client lays it out.
pub fn write_key(trust_dir: &Path, key_id: &str, role: &str, gun: &str) -> PathBuf {
    let mut block = pem::Pem::new("ENCRYPTED PRIVATE KEY", format!("key material of {key_id}"));
    block.headers_mut().add("role", role).unwrap();
    if !gun.is_empty() {
        block.headers_mut().add("gun", gun).unwrap();
    }
    let path = private_key_path(trust_dir, key_id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, pem::encode(&block)).unwrap();
    path
}

/// Crypto service answering from a fixed role table.
#[derive(Debug, Default)]
pub struct StaticCrypto {
    keys: HashMap<RoleName, Vec<String>>,
}

impl StaticCrypto {
    pub fn with_key(mut self, role: RoleName, key_id: &str) -> Self {
        self.keys.entry(role).or_default().push(key_id.to_string());
        self
    }
}

#[async_trait]
impl CryptoService for StaticCrypto {
    fn list_keys(&self, role: &RoleName) -> Vec<String> {
        self.keys.get(role).cloned().unwrap_or_default()
    }

    async fn import_private_key(
        &self,
        _role: &RoleName,
        _gun: &Gun,
        _pem: &[u8],
    ) -> Result<String, RepositoryError> {
        Err(RepositoryError::InvalidInput("imports are not supported".to_string()))
    }

    fn get_private_key_role(&self, key_id: &str) -> Result<RoleName, RepositoryError> {
        self.keys
            .iter()
            .find(|(_, ids)| ids.iter().any(|id| id == key_id))
            .map(|(role, _)| role.clone())
            .ok_or_else(|| RepositoryError::NotFound(key_id.to_string()))
    }
}

/// Repository client whose repositories talk to the trust server.
pub struct ServerBackedClient {
    remote_url: String,
    crypto: Arc<StaticCrypto>,
    events: Arc<Mutex<Vec<String>>>,
}

impl ServerBackedClient {
    pub fn new(remote_url: &str, crypto: StaticCrypto) -> Self {
        Self {
            remote_url: remote_url.to_string(),
            crypto: Arc::new(crypto),
            events: Arc::default(),
        }
    }

    /// Local mutations and remote calls in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrustRepositoryClient for ServerBackedClient {
    async fn open(&self, request: OpenRequest) -> Result<Arc<dyn Repository>, RepositoryError> {
        Ok(Arc::new(ServerRepository {
            gun: request.gun,
            remote_url: request.remote_url,
            transport: request.transport,
            crypto: self.crypto.clone(),
            events: self.events.clone(),
        }))
    }

    async fn delete_trust_data(&self, request: DeleteRequest) -> Result<(), RepositoryError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("delete local {}", request.gun));
        if !request.delete_remote {
            return Ok(());
        }
        let transport = request.transport.ok_or(RepositoryError::Offline)?;
        send(
            transport.as_ref(),
            Method::DELETE,
            &tuf_url(&self.remote_url, &request.gun, "")?,
            None,
        )
        .await?;
        self.events
            .lock()
            .unwrap()
            .push(format!("delete remote {}", request.gun));
        Ok(())
    }

    async fn load_full_repo(
        &self,
        repository: &dyn Repository,
        options: LoadOptions,
    ) -> Result<TufMetadata, RepositoryError> {
        let transport = options.transport.ok_or(RepositoryError::Offline)?;
        let root = send(
            transport.as_ref(),
            Method::GET,
            &tuf_url(&self.remote_url, repository.gun(), "root.json")?,
            None,
        )
        .await?;
        Ok(TufMetadata {
            root: serde_json::from_slice(&root)
                .map_err(|err| RepositoryError::Remote(err.to_string()))?,
            ..TufMetadata::default()
        })
    }
}

struct ServerRepository {
    gun: Gun,
    remote_url: String,
    transport: Option<Arc<dyn RoundTripper>>,
    crypto: Arc<StaticCrypto>,
    events: Arc<Mutex<Vec<String>>>,
}

impl ServerRepository {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn online(&self) -> Result<&dyn RoundTripper, RepositoryError> {
        self.transport.as_deref().ok_or(RepositoryError::Offline)
    }
}

#[derive(Deserialize)]
struct DelegationsDocument {
    roles: Vec<Role>,
}

#[async_trait]
impl Repository for ServerRepository {
    fn gun(&self) -> &Gun {
        &self.gun
    }

    async fn initialize_with_certificate(
        &self,
        root_key_ids: Vec<String>,
        root_certs: Vec<PublicKey>,
    ) -> Result<(), RepositoryError> {
        self.record(format!(
            "initialize {} keys={} certs={}",
            self.gun,
            root_key_ids.len(),
            root_certs.len()
        ));
        Ok(())
    }

    async fn add_delegation(
        &self,
        role: &RoleName,
        keys: &[PublicKey],
        paths: &[String],
    ) -> Result<(), RepositoryError> {
        self.record(format!("stage {role} keys={} paths={}", keys.len(), paths.len()));
        Ok(())
    }

    async fn remove_delegation_keys(
        &self,
        role: &RoleName,
        key_ids: &[String],
    ) -> Result<(), RepositoryError> {
        self.record(format!("unstage {role} {}", key_ids.join(",")));
        Ok(())
    }

    async fn get_delegation_roles(&self) -> Result<Vec<Role>, RepositoryError> {
        let body = send(
            self.online()?,
            Method::GET,
            &tuf_url(&self.remote_url, &self.gun, "targets.json")?,
            None,
        )
        .await?;
        let document: DelegationsDocument = serde_json::from_slice(&body)
            .map_err(|err| RepositoryError::Remote(err.to_string()))?;
        Ok(document.roles)
    }

    fn crypto_service(&self) -> Arc<dyn CryptoService> {
        self.crypto.clone()
    }

    async fn publish(&self) -> Result<(), RepositoryError> {
        send(
            self.online()?,
            Method::POST,
            &tuf_url(&self.remote_url, &self.gun, "")?,
            Some(format!("{{\"gun\":\"{}\"}}", self.gun).into_bytes()),
        )
        .await?;
        self.record(format!("publish {}", self.gun));
        Ok(())
    }
}

fn tuf_url(remote_url: &str, gun: &Gun, file: &str) -> Result<Url, RepositoryError> {
    let base = remote_url.trim_end_matches('/');
    Url::parse(&format!("{base}/v2/{gun}/_trust/tuf/{file}"))
        .map_err(|err| RepositoryError::InvalidInput(err.to_string()))
}

async fn send(
    transport: &dyn RoundTripper,
    method: Method,
    url: &Url,
    body: Option<Vec<u8>>,
) -> Result<Vec<u8>, RepositoryError> {
    let mut request = Request::new(method, url.clone());
    if let Some(body) = body {
        *request.body_mut() = Some(Body::from(body));
    }
    let response = transport
        .round_trip(request)
        .await
        .map_err(|err| RepositoryError::Remote(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(RepositoryError::Remote(format!("{url} answered {status}")));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| RepositoryError::Remote(err.to_string()))?;
    Ok(bytes.to_vec())
}
