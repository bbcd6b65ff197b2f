//! Local private key storage.
//!
//! The on-disk layout matches the notary client: each private key lives in
//! `<trust_dir>/private/<key_id>.key` as a single PEM block whose `role` and
//! `gun` headers record what the key is for. [`FileKeyStore`] reads that
//! layout; [`MemoryKeyStore`] keeps everything in process for embedders and
//! tests.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use crate::gun::Gun;
use crate::keys::KeyInfo;

/// Sub-directory of the trust directory holding private keys.
pub const PRIVATE_DIR: &str = "private";
/// File extension of private key files.
pub const KEY_EXTENSION: &str = "key";

const ROLE_HEADER: &str = "role";
const GUN_HEADER: &str = "gun";
/// Headers of legacy encrypted PEM blocks that must survive re-tagging.
const LEGACY_ENCRYPTION_HEADERS: [&str; 2] = ["Proc-Type", "DEK-Info"];

/// Errors raised by key store implementations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("unable to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid key file {}: {source}", path.display())]
    Pem {
        path: PathBuf,
        #[source]
        source: pem::PemError,
    },
    #[error("key file {} does not record a role", .0.display())]
    MissingRole(PathBuf),
    #[error("key {0} not found")]
    NotFound(String),
    #[error("invalid key id {0:?}")]
    InvalidKeyId(String),
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to locally stored private keys plus key import.
pub trait KeyStore: Send + Sync {
    /// Snapshot of every key id and what is recorded about it.
    fn list_keys(&self) -> HashMap<String, KeyInfo>;

    fn get_key_info(&self, key_id: &str) -> Result<KeyInfo, KeyStoreError>;

    /// Stores `private_key_pem` under `key_id`, tagging it with `info`.
    fn add_key(
        &self,
        key_id: &str,
        info: KeyInfo,
        private_key_pem: &[u8],
    ) -> Result<(), KeyStoreError>;
}

/// Opens a fresh key store handle. Called once per key enumeration.
pub type KeyStoreFactory =
    Arc<dyn Fn() -> Result<Arc<dyn KeyStore>, KeyStoreError> + Send + Sync>;

/// Returns the path of the private key file for `key_id`.
pub fn private_key_path(trust_dir: &Path, key_id: &str) -> PathBuf {
    trust_dir
        .join(PRIVATE_DIR)
        .join(format!("{key_id}.{KEY_EXTENSION}"))
}

/// Removes the private key files of `key_ids`, returning the ids whose file
/// could not be removed. Files that are already gone count as removed.
pub fn cleanup_keys<I, S>(trust_dir: &Path, key_ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut failed = Vec::new();
    for key_id in key_ids {
        let key_id = key_id.as_ref();
        let path = private_key_path(trust_dir, key_id);
        match fs::remove_file(&path) {
            Ok(()) => debug!(key_id, path = %path.display(), "removed private key"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(key_id, path = %path.display(), error = %err, "failed to remove private key");
                failed.push(key_id.to_string());
            }
        }
    }
    failed
}

/// Key store backed by a notary trust directory.
pub struct FileKeyStore {
    trust_dir: PathBuf,
    keys: RwLock<HashMap<String, KeyInfo>>,
}

impl FileKeyStore {
    /// Scans `<trust_dir>/private` once. A missing directory is an empty
    /// store; unreadable or malformed key files are skipped with a warning.
    pub fn open(trust_dir: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let trust_dir = trust_dir.into();
        let keys = scan_private_dir(&trust_dir.join(PRIVATE_DIR))?;
        debug!(trust_dir = %trust_dir.display(), keys = keys.len(), "opened file key store");
        Ok(Self {
            trust_dir,
            keys: RwLock::new(keys),
        })
    }

    /// Factory opening a new [`FileKeyStore`] on every call.
    pub fn factory(trust_dir: impl Into<PathBuf>) -> KeyStoreFactory {
        let trust_dir = trust_dir.into();
        Arc::new(move || -> Result<Arc<dyn KeyStore>, KeyStoreError> {
            Ok(Arc::new(FileKeyStore::open(trust_dir.clone())?))
        })
    }
}

impl KeyStore for FileKeyStore {
    fn list_keys(&self) -> HashMap<String, KeyInfo> {
        match self.keys.read() {
            Ok(keys) => keys.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn get_key_info(&self, key_id: &str) -> Result<KeyInfo, KeyStoreError> {
        self.list_keys()
            .remove(key_id)
            .ok_or_else(|| KeyStoreError::NotFound(key_id.to_string()))
    }

    fn add_key(
        &self,
        key_id: &str,
        info: KeyInfo,
        private_key_pem: &[u8],
    ) -> Result<(), KeyStoreError> {
        if key_id.is_empty() || key_id.contains(&['/', '\\', '.'][..]) {
            return Err(KeyStoreError::InvalidKeyId(key_id.to_string()));
        }
        let path = private_key_path(&self.trust_dir, key_id);
        let encoded = tag_key(&path, &info, private_key_pem)?;
        write_private(&path, encoded.as_bytes())?;
        debug!(key_id, role = %info.role, gun = %info.gun, "stored private key");

        let mut keys = match self.keys.write() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.insert(key_id.to_string(), info);
        Ok(())
    }
}

fn scan_private_dir(dir: &Path) -> Result<HashMap<String, KeyInfo>, KeyStoreError> {
    let mut keys = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(keys),
        Err(source) => {
            return Err(KeyStoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    for entry in entries {
        let entry = entry.map_err(|source| KeyStoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(KEY_EXTENSION) {
            continue;
        }
        let Some(key_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match read_key_info(&path) {
            Ok(info) => {
                keys.insert(key_id.to_string(), info);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable key file"),
        }
    }
    Ok(keys)
}

fn read_key_info(path: &Path) -> Result<KeyInfo, KeyStoreError> {
    let bytes = fs::read(path).map_err(|source| KeyStoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let block = pem::parse(&bytes).map_err(|source| KeyStoreError::Pem {
        path: path.to_path_buf(),
        source,
    })?;
    let headers = block.headers();
    let role = headers
        .get(ROLE_HEADER)
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .ok_or_else(|| KeyStoreError::MissingRole(path.to_path_buf()))?;
    let gun = headers.get(GUN_HEADER).map(str::trim).unwrap_or_default();
    Ok(KeyInfo::new(role, Gun::new(gun)))
}

fn tag_key(path: &Path, info: &KeyInfo, private_key_pem: &[u8]) -> Result<String, KeyStoreError> {
    let pem_error = |source| KeyStoreError::Pem {
        path: path.to_path_buf(),
        source,
    };
    let parsed = pem::parse(private_key_pem).map_err(pem_error)?;
    let mut block = pem::Pem::new(parsed.tag(), parsed.contents());
    for name in LEGACY_ENCRYPTION_HEADERS {
        if let Some(value) = parsed.headers().get(name) {
            block.headers_mut().add(name, value).map_err(pem_error)?;
        }
    }
    block
        .headers_mut()
        .add(ROLE_HEADER, info.role.as_str())
        .map_err(pem_error)?;
    if !info.gun.is_empty() {
        block
            .headers_mut()
            .add(GUN_HEADER, info.gun.as_str())
            .map_err(pem_error)?;
    }
    Ok(pem::encode(&block))
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), KeyStoreError> {
    let io_error = |source| KeyStoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(io_error)?;
    file.write_all(contents).map_err(io_error)?;
    file.sync_all().map_err(io_error)
}

/// Key store held entirely in memory.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, (KeyInfo, Vec<u8>)>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from `(id, info)` pairs with empty key material.
    pub fn with_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = (String, KeyInfo)>,
    {
        let keys = keys
            .into_iter()
            .map(|(id, info)| (id, (info, Vec::new())))
            .collect();
        Self {
            keys: RwLock::new(keys),
        }
    }

    /// Returns the PEM stored for `key_id`.
    pub fn private_key(&self, key_id: &str) -> Option<Vec<u8>> {
        let keys = match self.keys.read() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.get(key_id).map(|(_, pem)| pem.clone())
    }
}

impl KeyStore for MemoryKeyStore {
    fn list_keys(&self) -> HashMap<String, KeyInfo> {
        let keys = match self.keys.read() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.iter()
            .map(|(id, (info, _))| (id.clone(), info.clone()))
            .collect()
    }

    fn get_key_info(&self, key_id: &str) -> Result<KeyInfo, KeyStoreError> {
        self.list_keys()
            .remove(key_id)
            .ok_or_else(|| KeyStoreError::NotFound(key_id.to_string()))
    }

    fn add_key(
        &self,
        key_id: &str,
        info: KeyInfo,
        private_key_pem: &[u8],
    ) -> Result<(), KeyStoreError> {
        let mut keys = match self.keys.write() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.insert(key_id.to_string(), (info, private_key_pem.to_vec()));
        Ok(())
    }
}
