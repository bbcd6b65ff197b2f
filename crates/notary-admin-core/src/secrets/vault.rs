//! Passphrase storage in HashiCorp Vault.
//!
//! Speaks the Vault HTTP API directly: userpass login, the password
//! generator plugin at `gen/password` and a KV version 2 mount holding one
//! secret per key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use super::{PasswordGenerator, PasswordOptions, SecretsError};
use crate::passphrase::{Passphrase, PassphraseError, PassphraseRetriever};

const ENV_VAULT_ADDR: &str = "VAULT_ADDR";
const ENV_VAULT_TOKEN: &str = "VAULT_TOKEN";
const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";
const TOKEN_HEADER: &str = "X-Vault-Token";

/// KV mount holding key passphrases.
pub const DEFAULT_KV_MOUNT: &str = "dctna";
/// Environment segment below the KV mount.
pub const DEFAULT_KV_ENVIRONMENT: &str = "dev";
/// Attempts after which the repository client should stop asking.
const MAX_RETRIES: u32 = 3;

/// Connection settings for Vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub address: String,
    pub token: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_VAULT_ADDR.to_string(),
            token: None,
        }
    }
}

impl VaultConfig {
    pub fn from_os_env() -> Self {
        Self::from_env_iter(std::env::vars())
    }

    /// Reads `VAULT_ADDR` and `VAULT_TOKEN`.
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
        let get = |name: &str| {
            map.get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            address: get(ENV_VAULT_ADDR).unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_string()),
            token: get(ENV_VAULT_TOKEN),
        }
    }
}

/// The password and alias stored for one key.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultKeyPassword {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
}

impl std::fmt::Debug for VaultKeyPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyPassword")
            .field("password", &"<redacted>")
            .field("alias", &self.alias)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    auth: Option<SecretAuth>,
}

#[derive(Debug, Deserialize)]
struct SecretAuth {
    client_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Minimal Vault API client.
#[derive(Debug, Clone)]
pub struct VaultClient {
    http: Client,
    address: Url,
    token: Option<String>,
}

impl VaultClient {
    pub fn new(config: &VaultConfig) -> Result<Self, SecretsError> {
        let http = Client::builder().use_rustls_tls().build()?;
        Self::with_http_client(http, config)
    }

    pub fn with_http_client(http: Client, config: &VaultConfig) -> Result<Self, SecretsError> {
        let mut address = Url::parse(config.address.trim()).map_err(|err| SecretsError::InvalidAddress {
            address: config.address.clone(),
            reason: err.to_string(),
        })?;
        if address.cannot_be_a_base() {
            return Err(SecretsError::InvalidAddress {
                address: config.address.clone(),
                reason: "a scheme and host are required".to_string(),
            });
        }
        if !address.path().ends_with('/') {
            let path = format!("{}/", address.path());
            address.set_path(&path);
        }
        Ok(Self {
            http,
            address,
            token: config.token.clone(),
        })
    }

    /// Logs in with the userpass auth method and keeps the issued token.
    pub async fn authenticated(
        config: &VaultConfig,
        username: &str,
        password: &str,
    ) -> Result<Self, SecretsError> {
        let mut client = Self::new(config)?;
        let token = client.login_userpass(username, password).await?;
        client.token = Some(token);
        Ok(client)
    }

    /// `PUT v1/auth/userpass/login/<username>`; returns the client token.
    /// The username is sent as a single percent-encoded path segment.
    pub async fn login_userpass(&self, username: &str, password: &str) -> Result<String, SecretsError> {
        let segments = ["auth", "userpass", "login", username];
        let path = segments.join("/");
        let secret = self
            .request(Method::PUT, &segments, Some(&json!({ "password": password })))
            .await?
            .ok_or_else(|| SecretsError::NotFound(path.clone()))?;
        secret
            .auth
            .map(|auth| auth.client_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SecretsError::UnexpectedFormat(format!("{path}: no client token")))
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Asks the Vault password generator plugin for a password.
    pub async fn generate_password(&self, options: &PasswordOptions) -> Result<String, SecretsError> {
        let segments = ["gen", "password"];
        let body = serde_json::to_value(options)
            .map_err(|err| SecretsError::InvalidOptions(err.to_string()))?;
        let secret = self
            .request(Method::PUT, &segments, Some(&body))
            .await?
            .ok_or_else(|| SecretsError::NotFound(segments.join("/")))?;
        secret
            .data
            .as_ref()
            .and_then(|data| data.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SecretsError::UnexpectedFormat("failed to read password".to_string()))
    }

    /// `<address>/v1/<segments>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SecretsError> {
        let mut url = self.address.clone();
        url.path_segments_mut()
            .map_err(|()| SecretsError::InvalidAddress {
                address: self.address.to_string(),
                reason: "a scheme and host are required".to_string(),
            })?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<Option<SecretResponse>, SecretsError> {
        let url = self.endpoint(segments)?;
        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let errors: ErrorResponse = response.json().await.unwrap_or_default();
            return Err(SecretsError::Status {
                path: segments.join("/"),
                status: status.as_u16(),
                message: errors.errors.join("; "),
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Some(SecretResponse {
                data: None,
                auth: None,
            }));
        }
        Ok(Some(response.json().await?))
    }
}

/// Password generator backed by Vault's `gen/password` endpoint.
pub struct VaultPasswordGenerator {
    client: VaultClient,
    options: PasswordOptions,
}

impl VaultPasswordGenerator {
    pub fn new(client: VaultClient, options: PasswordOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl PasswordGenerator for VaultPasswordGenerator {
    async fn generate(&self) -> Result<String, SecretsError> {
        self.client.generate_password(&self.options).await
    }
}

/// Stores one passphrase per key name in a KV version 2 mount and generates
/// missing ones on demand.
pub struct VaultCredentialsManager {
    client: VaultClient,
    generator: Arc<dyn PasswordGenerator>,
    mount: String,
    environment: String,
}

impl VaultCredentialsManager {
    pub fn new(client: VaultClient, generator: Arc<dyn PasswordGenerator>) -> Self {
        Self {
            client,
            generator,
            mount: DEFAULT_KV_MOUNT.to_string(),
            environment: DEFAULT_KV_ENVIRONMENT.to_string(),
        }
    }

    /// Stores secrets at `<mount>/data/<environment>/<key>`.
    pub fn with_path(mut self, mount: impl Into<String>, environment: impl Into<String>) -> Self {
        self.mount = mount.into();
        self.environment = environment.into();
        self
    }

    fn secret_path(&self, key: &str) -> String {
        format!("{}/data/{}/{key}", self.mount, self.environment)
    }

    fn secret_segments<'a>(&'a self, key: &'a str) -> [&'a str; 4] {
        [self.mount.as_str(), "data", self.environment.as_str(), key]
    }

    /// Reads the stored password, generating and storing one when it is
    /// missing and `create_new` is set.
    pub async fn read_or_generate(
        &self,
        key: &str,
        alias: &str,
        create_new: bool,
    ) -> Result<VaultKeyPassword, SecretsError> {
        match self.read_password(key).await {
            Err(SecretsError::NotFound(_)) if create_new => {
                debug!(key, "generating new credential");
                let password = self.generator.generate().await?;
                debug!(key, "persisting new credential");
                self.store_password(key, &password, alias).await?;
                Ok(VaultKeyPassword {
                    password,
                    alias: alias.to_string(),
                })
            }
            result => result,
        }
    }

    pub async fn store_password(&self, key: &str, password: &str, alias: &str) -> Result<(), SecretsError> {
        let secret = VaultKeyPassword {
            password: password.to_string(),
            alias: alias.to_string(),
        };
        let path = self.secret_path(key);
        self.client
            .request(Method::PUT, &self.secret_segments(key), Some(&json!({ "data": secret })))
            .await?
            .ok_or_else(|| SecretsError::NotFound(path.clone()))?;
        Ok(())
    }

    pub async fn read_password(&self, key: &str) -> Result<VaultKeyPassword, SecretsError> {
        let path = self.secret_path(key);
        let secret = self
            .client
            .request(Method::GET, &self.secret_segments(key), None)
            .await?
            .ok_or_else(|| SecretsError::NotFound(path.clone()))?;
        let data = secret
            .data
            .as_ref()
            .and_then(|data| data.get("data"))
            .ok_or_else(|| SecretsError::UnexpectedFormat(path.clone()))?;
        let password = data
            .get("password")
            .and_then(Value::as_str)
            .ok_or_else(|| SecretsError::UnexpectedFormat(path.clone()))?;
        let alias = data.get("alias").and_then(Value::as_str).unwrap_or_default();
        Ok(VaultKeyPassword {
            password: password.to_string(),
            alias: alias.to_string(),
        })
    }
}

#[async_trait]
impl PassphraseRetriever for VaultCredentialsManager {
    async fn retrieve(
        &self,
        key_name: &str,
        alias: &str,
        create_new: bool,
        attempts: u32,
    ) -> Result<Passphrase, PassphraseError> {
        debug!(key_name, alias, create_new, attempts, "getting credential");
        let give_up = attempts > MAX_RETRIES;
        match self.read_or_generate(key_name, alias, create_new).await {
            Ok(secret) => Ok(Passphrase {
                passphrase: secret.password,
                give_up,
            }),
            Err(err) => {
                error!(key_name, alias, attempts, error = %err, "failed to get password");
                Err(PassphraseError::Backend {
                    message: err.to_string(),
                    give_up,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::matchers::{all_of, contains, eq, json_decoded, request};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};

    fn client_for(server: &Server) -> VaultClient {
        VaultClient::new(&VaultConfig {
            address: server.url_str(""),
            token: Some("root-token".to_string()),
        })
        .unwrap()
    }

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl PasswordGenerator for FixedGenerator {
        async fn generate(&self) -> Result<String, SecretsError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn env_config() {
        let config = VaultConfig::from_env_iter([("VAULT_ADDR", "http://vault:8200"), ("VAULT_TOKEN", " ")]);
        assert_eq!(config.address, "http://vault:8200");
        assert!(config.token.is_none());
        assert_eq!(VaultConfig::from_env_iter(Vec::<(String, String)>::new()), VaultConfig::default());
    }

    #[tokio::test]
    async fn userpass_login_returns_token() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PUT", "/v1/auth/userpass/login/signer"),
                request::body(json_decoded(eq(serde_json::json!({"password": "s3cret"})))),
            ])
            .respond_with(json_encoded(serde_json::json!({"auth": {"client_token": "s.abc"}}))),
        );
        let client = VaultClient::authenticated(
            &VaultConfig {
                address: server.url_str(""),
                token: None,
            },
            "signer",
            "s3cret",
        )
        .await
        .unwrap();
        assert_eq!(client.token(), Some("s.abc"));
    }

    /// Separators in the username stay inside its path segment.
    #[tokio::test]
    async fn userpass_login_encodes_username() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "PUT",
                "/v1/auth/userpass/login/ci%2Fbot%3Fadmin",
            ))
            .times(1)
            .respond_with(json_encoded(serde_json::json!({"auth": {"client_token": "s.ci"}}))),
        );
        let token = client_for(&server)
            .login_userpass("ci/bot?admin", "s3cret")
            .await
            .unwrap();
        assert_eq!(token, "s.ci");
    }

    #[test]
    fn endpoints_keep_the_address_prefix() {
        let client = VaultClient::new(&VaultConfig {
            address: "https://vault.example.com/prefix".to_string(),
            token: None,
        })
        .unwrap();
        let url = client.endpoint(&["dctna", "data", "dev", "abc123"]).unwrap();
        assert_eq!(url.as_str(), "https://vault.example.com/prefix/v1/dctna/data/dev/abc123");
    }

    #[tokio::test]
    async fn generator_plugin_receives_options() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PUT", "/v1/gen/password"),
                request::headers(contains(("x-vault-token", "root-token"))),
                request::body(json_decoded(eq(serde_json::json!({"length": 32})))),
            ])
            .respond_with(json_encoded(serde_json::json!({"data": {"value": "generated"}}))),
        );
        let generator = VaultPasswordGenerator::new(
            client_for(&server),
            PasswordOptions {
                length: Some(32),
                ..PasswordOptions::default()
            },
        );
        assert_eq!(generator.generate().await.unwrap(), "generated");
    }

    #[tokio::test]
    async fn reads_stored_password() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/dctna/data/dev/abc123"))
                .respond_with(json_encoded(serde_json::json!({
                    "data": {"data": {"password": "pw", "alias": "root"}, "metadata": {"version": 1}}
                }))),
        );
        let manager = VaultCredentialsManager::new(client_for(&server), Arc::new(FixedGenerator("unused")));
        let secret = manager.read_password("abc123").await.unwrap();
        assert_eq!(secret.password, "pw");
        assert_eq!(secret.alias, "root");
    }

    /// Missing secrets are generated, stored and returned when creating keys.
    #[tokio::test]
    async fn missing_password_is_generated_and_stored() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/dctna/data/dev/abc123"))
                .times(1)
                .respond_with(status_code(404).body(r#"{"errors":[]}"#)),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("PUT", "/v1/dctna/data/dev/abc123"),
                request::body(json_decoded(eq(serde_json::json!({
                    "data": {"password": "fresh", "alias": "targets"}
                })))),
            ])
            .times(1)
            .respond_with(json_encoded(serde_json::json!({"data": {"version": 1}}))),
        );
        let manager = VaultCredentialsManager::new(client_for(&server), Arc::new(FixedGenerator("fresh")));
        let passphrase = manager.retrieve("abc123", "targets", true, 0).await.unwrap();
        assert_eq!(passphrase.passphrase, "fresh");
        assert!(!passphrase.give_up);
    }

    #[tokio::test]
    async fn missing_password_without_create_is_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/dctna/data/dev/abc123"))
                .times(2)
                .respond_with(status_code(404)),
        );
        let manager = VaultCredentialsManager::new(client_for(&server), Arc::new(FixedGenerator("unused")));
        assert!(matches!(
            manager.read_or_generate("abc123", "root", false).await,
            Err(SecretsError::NotFound(_))
        ));
        let err = manager.retrieve("abc123", "root", false, 4).await.unwrap_err();
        assert!(err.give_up());
    }

    #[tokio::test]
    async fn server_errors_carry_vault_messages() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/kv/data/prod/abc123"))
                .respond_with(status_code(403).body(r#"{"errors":["permission denied"]}"#)),
        );
        let manager = VaultCredentialsManager::new(client_for(&server), Arc::new(FixedGenerator("unused")))
            .with_path("kv", "prod");
        let err = manager.read_password("abc123").await.unwrap_err();
        assert!(matches!(err, SecretsError::Status { status: 403, .. }));
        assert!(err.to_string().contains("permission denied"));
    }
}
