//! Trust service configuration.
//!
//! The JSON shape follows the notary client's `config.json` (`trust_dir`,
//! `remote_server`, `trust_pinning`), so an existing notary configuration
//! file can be loaded with [`NotaryConfig::from_json_slice`]. Embedders
//! without a file build the configuration from `NOTARY_*` environment
//! variables instead.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::repository::TrustPinConfig;

/// Environment variable overriding the trust directory.
const ENV_TRUST_DIR: &str = "NOTARY_TRUST_DIR";
/// Environment variable carrying the trust server URL.
const ENV_SERVER_URL: &str = "NOTARY_SERVER_URL";
/// Environment variable pointing at a PEM CA bundle for the trust server.
const ENV_ROOT_CA: &str = "NOTARY_ROOT_CA";
/// Environment variable pointing at a PEM client certificate.
const ENV_TLS_CLIENT_CERT: &str = "NOTARY_TLS_CLIENT_CERT";
/// Environment variable pointing at the PEM key of the client certificate.
const ENV_TLS_CLIENT_KEY: &str = "NOTARY_TLS_CLIENT_KEY";
/// Environment variable disabling server certificate verification.
const ENV_SKIP_TLS_VERIFY: &str = "NOTARY_SKIP_TLS_VERIFY";

/// Trust server used when none is configured.
pub const DEFAULT_SERVER_URL: &str = "https://notary-server:4443";
/// Trust directory name below `$HOME`.
const DEFAULT_TRUST_DIR_NAME: &str = ".notary";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid format for trust_pinning.certs: {0}")]
    InvalidTrustPinning(String),
    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Connection settings for the remote trust server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteServerConfig {
    pub url: String,
    pub root_ca: Option<PathBuf>,
    pub tls_client_cert: Option<PathBuf>,
    pub tls_client_key: Option<PathBuf>,
    pub skip_tls_verify: bool,
}

impl Default for RemoteServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            root_ca: None,
            tls_client_cert: None,
            tls_client_key: None,
            skip_tls_verify: false,
        }
    }
}

/// Trust pinning section as written by users.
///
/// `certs` is kept as raw JSON so malformed entries are reported with a
/// configuration error instead of failing the whole file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrustPinningConfig {
    pub ca: HashMap<String, String>,
    pub certs: HashMap<String, Value>,
    pub disable_tofu: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotaryConfig {
    pub trust_dir: PathBuf,
    pub remote_server: RemoteServerConfig,
    pub trust_pinning: TrustPinningConfig,
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            trust_dir: default_trust_dir(env::var("HOME").ok().as_deref()),
            remote_server: RemoteServerConfig::default(),
            trust_pinning: TrustPinningConfig::default(),
        }
    }
}

impl NotaryConfig {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |name: &str| map.get(name).and_then(|value| sanitize_non_empty(value));

        let trust_dir = get(ENV_TRUST_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_trust_dir(map.get("HOME").map(String::as_str)));
        let remote_server = RemoteServerConfig {
            url: get(ENV_SERVER_URL).unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            root_ca: get(ENV_ROOT_CA).map(PathBuf::from),
            tls_client_cert: get(ENV_TLS_CLIENT_CERT).map(PathBuf::from),
            tls_client_key: get(ENV_TLS_CLIENT_KEY).map(PathBuf::from),
            skip_tls_verify: parse_bool(map.get(ENV_SKIP_TLS_VERIFY).map(String::as_str), false),
        };

        Self {
            trust_dir,
            remote_server,
            trust_pinning: TrustPinningConfig::default(),
        }
    }

    /// Parses a notary `config.json` document. Missing sections take their
    /// defaults.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Converts the trust pinning section for the repository client.
    ///
    /// Every `certs` entry must be a list of certificate id strings.
    pub fn trust_pin_config(&self) -> Result<TrustPinConfig, ConfigError> {
        let mut certs = HashMap::with_capacity(self.trust_pinning.certs.len());
        for (gun, value) in &self.trust_pinning.certs {
            let ids = value
                .as_array()
                .ok_or_else(|| ConfigError::InvalidTrustPinning(format!("{gun} is not a list")))?;
            let ids = ids
                .iter()
                .map(|id| match id.as_str() {
                    Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
                    _ => Err(ConfigError::InvalidTrustPinning(format!(
                        "{gun} contains an invalid certificate id"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            certs.insert(gun.clone(), ids);
        }
        Ok(TrustPinConfig {
            ca: self.trust_pinning.ca.clone(),
            certs,
            disable_tofu: self.trust_pinning.disable_tofu,
        })
    }
}

fn default_trust_dir(home: Option<&str>) -> PathBuf {
    match home.and_then(sanitize_non_empty) {
        Some(home) => PathBuf::from(home).join(DEFAULT_TRUST_DIR_NAME),
        None => PathBuf::from(DEFAULT_TRUST_DIR_NAME),
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
pub(crate) fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Ensures defaults point at the standard trust server and `$HOME/.notary`.
    #[test]
    fn env_defaults() {
        let config = NotaryConfig::from_env_iter([("HOME", "/home/signer")]);
        assert_eq!(config.trust_dir, PathBuf::from("/home/signer/.notary"));
        assert_eq!(config.remote_server.url, DEFAULT_SERVER_URL);
        assert!(!config.remote_server.skip_tls_verify);
        assert!(config.remote_server.root_ca.is_none());
    }

    /// Confirms every remote server variable is honoured and blanks are ignored.
    #[test]
    fn env_overrides() {
        let config = NotaryConfig::from_env_iter([
            (ENV_TRUST_DIR, " /var/lib/trust "),
            (ENV_SERVER_URL, "https://notary.example.com"),
            (ENV_ROOT_CA, "/etc/ca.pem"),
            (ENV_TLS_CLIENT_CERT, ""),
            (ENV_SKIP_TLS_VERIFY, "Yes"),
        ]);
        assert_eq!(config.trust_dir, PathBuf::from("/var/lib/trust"));
        assert_eq!(config.remote_server.url, "https://notary.example.com");
        assert_eq!(config.remote_server.root_ca, Some(PathBuf::from("/etc/ca.pem")));
        assert!(config.remote_server.tls_client_cert.is_none());
        assert!(config.remote_server.skip_tls_verify);
    }

    #[test]
    fn parse_bool_permits_common_variants() {
        assert!(parse_bool(Some("true"), false));
        assert!(parse_bool(Some(" t "), false));
        assert!(!parse_bool(Some("N"), true));
        assert!(parse_bool(Some("maybe"), true));
        assert!(!parse_bool(None, false));
    }

    #[test]
    fn json_file_uses_notary_field_names() {
        let config = NotaryConfig::from_json_slice(
            json!({
                "trust_dir": "/trust",
                "remote_server": {"url": "https://localhost:4443", "skip_tls_verify": true},
                "trust_pinning": {"certs": {"example.com/app": ["abc"]}, "disable_tofu": true}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(config.trust_dir, PathBuf::from("/trust"));
        assert_eq!(config.remote_server.url, "https://localhost:4443");
        assert!(config.remote_server.skip_tls_verify);

        let pin = config.trust_pin_config().unwrap();
        assert!(pin.disable_tofu);
        assert_eq!(pin.certs["example.com/app"], vec!["abc".to_string()]);
    }

    #[test]
    fn malformed_trust_pinning_is_rejected() {
        for certs in [json!({"g": "abc"}), json!({"g": [1]}), json!({"g": [""]})] {
            let config = NotaryConfig::from_json_slice(
                json!({"trust_pinning": {"certs": certs}}).to_string().as_bytes(),
            )
            .unwrap();
            assert!(matches!(
                config.trust_pin_config(),
                Err(ConfigError::InvalidTrustPinning(_))
            ));
        }
    }

    #[test]
    fn missing_sections_take_defaults() {
        let config = NotaryConfig::from_json_slice(b"{}").unwrap();
        assert_eq!(config.remote_server.url, DEFAULT_SERVER_URL);
        assert!(config.trust_pin_config().unwrap().certs.is_empty());
    }
}
