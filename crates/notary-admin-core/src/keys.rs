//! Key records and composable key predicates.
//!
//! Predicates are built by constructor functions and hold no shared state,
//! so any combination can be evaluated concurrently from pipeline tasks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gun::{Gun, RoleName, ROOT_ROLE, SNAPSHOT_ROLE, TARGETS_ROLE};

/// Key listed by the local trust store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Content-derived key identifier.
    pub id: String,
    /// Owning repository; empty for root keys.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gun: String,
    /// Canonical role name or signer name.
    pub role: String,
}

impl Key {
    pub fn new(id: impl Into<String>, gun: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gun: gun.into(),
            role: role.into(),
        }
    }

    /// Builds the record published for a key store entry.
    pub(crate) fn from_info(id: String, info: &KeyInfo) -> Self {
        Self {
            id,
            gun: info.gun.to_string(),
            role: info.role.to_string(),
        }
    }
}

/// What the local key store records about a key id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub role: RoleName,
    pub gun: Gun,
}

impl KeyInfo {
    pub fn new(role: impl Into<RoleName>, gun: impl Into<Gun>) -> Self {
        Self {
            role: role.into(),
            gun: gun.into(),
        }
    }
}

/// Exported private key material for one key id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyData {
    /// Raw bytes of the key file, base64 encoded in JSON.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub key: Vec<u8>,
    #[serde(default)]
    pub role: RoleName,
    #[serde(default, skip_serializing_if = "Gun::is_empty")]
    pub gun: Gun,
}

/// Serde adapter encoding byte buffers as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Predicate over [`Key`] records.
#[derive(Clone)]
pub struct KeyFilter(Arc<dyn Fn(&Key) -> bool + Send + Sync>);

impl KeyFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Key) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn matches(&self, key: &Key) -> bool {
        (self.0)(key)
    }
}

impl fmt::Debug for KeyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyFilter(..)")
    }
}

/// Matches every key.
pub fn all_keys() -> KeyFilter {
    KeyFilter::new(|_| true)
}

/// Matches keys whose role equals `role`.
pub fn role_filter(role: impl Into<String>) -> KeyFilter {
    let role = role.into();
    KeyFilter::new(move |key| key.role == role)
}

pub fn root_filter() -> KeyFilter {
    role_filter(ROOT_ROLE)
}

pub fn targets_filter() -> KeyFilter {
    role_filter(TARGETS_ROLE)
}

pub fn snapshots_filter() -> KeyFilter {
    role_filter(SNAPSHOT_ROLE)
}

/// Matches keys whose id starts with `prefix`.
pub fn id_filter(prefix: impl Into<String>) -> KeyFilter {
    let prefix = prefix.into();
    KeyFilter::new(move |key| key.id.starts_with(&prefix))
}

/// Matches keys owned by `gun`, compared after trimming spaces and tabs.
pub fn gun_filter(gun: impl AsRef<str>) -> KeyFilter {
    let gun = gun.as_ref().trim_matches(&[' ', '\t'][..]).to_string();
    KeyFilter::new(move |key| key.gun == gun)
}

/// Conjunction of `filters`, stopping at the first predicate that fails.
pub fn and_filter(filters: impl IntoIterator<Item = KeyFilter>) -> KeyFilter {
    let filters: Vec<KeyFilter> = filters.into_iter().collect();
    KeyFilter::new(move |key| filters.iter().all(|filter| filter.matches(key)))
}
