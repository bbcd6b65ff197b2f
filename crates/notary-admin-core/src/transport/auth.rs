//! Request authorisation against registered challenges.
//!
//! An [`Authorizer`] looks up the challenges recorded for a request's
//! endpoint and lets the handler of each challenge's scheme attach
//! credentials. [`TokenHandler`] implements the bearer token flow of the
//! notary server; [`BasicHandler`] attaches HTTP basic auth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::challenge::ChallengeManager;
use super::credentials::CredentialStore;
use super::{RoundTripper, TransportError};

/// Tokens are cached for at least this long, whatever the server says.
const MINIMUM_TOKEN_LIFETIME: Duration = Duration::from_secs(60);

/// Attaches credentials for one authentication scheme.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Lowercased scheme this handler answers, e.g. `bearer`.
    fn scheme(&self) -> &'static str;

    async fn authorize(
        &self,
        request: &mut Request,
        parameters: &HashMap<String, String>,
    ) -> Result<(), TransportError>;
}

/// HTTP basic authentication.
#[derive(Debug, Clone)]
pub struct BasicHandler {
    credentials: CredentialStore,
}

impl BasicHandler {
    pub fn new(credentials: CredentialStore) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl AuthHandler for BasicHandler {
    fn scheme(&self) -> &'static str {
        "basic"
    }

    async fn authorize(
        &self,
        request: &mut Request,
        _parameters: &HashMap<String, String>,
    ) -> Result<(), TransportError> {
        if let Some((username, password)) = self.credentials.credentials() {
            request
                .headers_mut()
                .insert(AUTHORIZATION, basic_header(username, password)?);
        }
        Ok(())
    }
}

fn basic_header(username: &str, password: &str) -> Result<HeaderValue, TransportError> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|err| TransportError::InvalidHeader(err.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    realm: String,
    service: String,
    token: String,
    expires_at: Instant,
}

/// Bearer token flow scoped to one repository.
///
/// Tokens are fetched from the challenge's realm with
/// `scope=repository:<gun>:<actions>` and reused until they expire.
pub struct TokenHandler {
    client: Client,
    credentials: CredentialStore,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenHandler {
    /// `client` performs the token requests and must not itself authorise.
    pub fn new(client: Client, credentials: CredentialStore, gun: &str, actions: &[&str]) -> Self {
        Self {
            client,
            credentials,
            scope: format!("repository:{gun}:{}", actions.join(",")),
            cache: Mutex::new(None),
        }
    }

    async fn token(&self, parameters: &HashMap<String, String>) -> Result<String, TransportError> {
        let realm = parameters
            .get("realm")
            .filter(|realm| !realm.is_empty())
            .ok_or(TransportError::MissingRealm)?;
        let service = parameters.get("service").cloned().unwrap_or_default();

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.realm == *realm && cached.service == service && Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let fetched = self.fetch_token(realm, &service, parameters.get("scope")).await?;
        *cache = Some(fetched.clone());
        Ok(fetched.token)
    }

    async fn fetch_token(
        &self,
        realm: &str,
        service: &str,
        challenge_scope: Option<&String>,
    ) -> Result<CachedToken, TransportError> {
        let mut url = Url::parse(realm).map_err(|err| TransportError::InvalidUrl {
            url: realm.to_string(),
            reason: err.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            if !service.is_empty() {
                query.append_pair("service", service);
            }
            query.append_pair("scope", &self.scope);
            for extra in challenge_scope
                .into_iter()
                .flat_map(|scope| scope.split_whitespace())
                .filter(|scope| *scope != self.scope)
            {
                query.append_pair("scope", extra);
            }
            if let Some((username, _)) = self.credentials.credentials() {
                query.append_pair("account", username);
            }
        }

        let mut request = self.client.get(url);
        if let Some((username, password)) = self.credentials.credentials() {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::TokenStatus(status.as_u16()));
        }
        let body: TokenResponse = response.json().await?;
        let token = if body.token.is_empty() {
            body.access_token
        } else {
            body.token
        };
        if token.is_empty() {
            return Err(TransportError::EmptyToken);
        }
        let lifetime = Duration::from_secs(body.expires_in).max(MINIMUM_TOKEN_LIFETIME);
        debug!(realm, service, scope = %self.scope, lifetime_secs = lifetime.as_secs(), "fetched bearer token");
        Ok(CachedToken {
            realm: realm.to_string(),
            service: service.to_string(),
            token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl AuthHandler for TokenHandler {
    fn scheme(&self) -> &'static str {
        "bearer"
    }

    async fn authorize(
        &self,
        request: &mut Request,
        parameters: &HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let token = self.token(parameters).await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| TransportError::InvalidHeader(err.to_string()))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Dispatches registered challenges to the matching handlers.
#[derive(Clone)]
pub struct Authorizer {
    challenges: Arc<ChallengeManager>,
    handlers: Vec<Arc<dyn AuthHandler>>,
}

impl Authorizer {
    pub fn new(challenges: Arc<ChallengeManager>, handlers: Vec<Arc<dyn AuthHandler>>) -> Self {
        Self {
            challenges,
            handlers,
        }
    }

    /// Authorises `request` for every challenge of its endpoint.
    pub async fn modify(&self, request: &mut Request) -> Result<(), TransportError> {
        let challenges = self.challenges.challenges_for(request.url()).to_vec();
        for challenge in &challenges {
            for handler in &self.handlers {
                if handler.scheme() == challenge.scheme {
                    handler.authorize(request, &challenge.parameters).await?;
                }
            }
        }
        Ok(())
    }
}

/// Sends requests through `client` after authorising them.
pub struct AuthTransport {
    client: Client,
    authorizer: Authorizer,
}

impl AuthTransport {
    pub fn new(client: Client, authorizer: Authorizer) -> Self {
        Self { client, authorizer }
    }
}

#[async_trait]
impl RoundTripper for AuthTransport {
    async fn round_trip(&self, mut request: Request) -> Result<Response, TransportError> {
        self.authorizer.modify(&mut request).await?;
        Ok(self.client.execute(request).await?)
    }
}
