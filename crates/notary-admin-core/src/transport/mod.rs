//! Authenticated transport negotiation with the trust server.
//!
//! [`build_transport`] probes the server's `/v2/` endpoint, records the
//! authentication challenges it answers with and returns a transport that
//! authorises every request for the repository at the requested
//! [`Permission`]. An unreachable server is not an error: the caller gets
//! `Ok(None)` and continues offline.

pub mod auth;
pub mod challenge;
pub mod credentials;
pub mod fallback;
pub mod tls;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Request, Response, StatusCode, Url};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RemoteServerConfig;
use crate::error::Error;
use crate::gun::Gun;

use self::auth::{AuthHandler, AuthTransport, Authorizer, BasicHandler, TokenHandler};
use self::challenge::ChallengeManager;
use self::credentials::CredentialStore;
use self::fallback::FallbackTransport;

/// How long the reachability probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("either pass both client key and cert, or neither")]
    ClientCertPair,
    #[error("invalid trust server URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("TLS configuration: {0}")]
    Tls(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no transports to fall back on")]
    NoCandidates,
    #[error("bearer challenge without a realm")]
    MissingRealm,
    #[error("token server answered with status {0}")]
    TokenStatus(u16),
    #[error("token server returned an empty token")]
    EmptyToken,
    #[error("invalid authorization header: {0}")]
    InvalidHeader(String),
}

impl TransportError {
    /// True for failures caused by local settings rather than the network.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TransportError::ClientCertPair | TransportError::InvalidUrl { .. } | TransportError::Tls(_)
        )
    }
}

/// Executes one HTTP request.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError>;
}

/// Access level requested from the token server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
    Admin,
}

impl Permission {
    /// Repository actions included in the token scope.
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Permission::ReadOnly => &["pull"],
            Permission::ReadWrite => &["push", "pull"],
            Permission::Admin => &["*"],
        }
    }
}

/// Negotiates a transport using `NOTARY_AUTH` credentials.
pub async fn build_transport(
    config: &RemoteServerConfig,
    gun: &Gun,
    permission: Permission,
    cancel: &CancellationToken,
) -> Result<Option<Arc<dyn RoundTripper>>, Error> {
    build_transport_with_credentials(config, gun, permission, CredentialStore::from_os_env(), cancel)
        .await
}

/// Negotiates a transport with explicit credentials.
///
/// Read-only transports first try anonymously and fall back to
/// `credentials` when the server still answers `401`.
pub async fn build_transport_with_credentials(
    config: &RemoteServerConfig,
    gun: &Gun,
    permission: Permission,
    credentials: CredentialStore,
    cancel: &CancellationToken,
) -> Result<Option<Arc<dyn RoundTripper>>, Error> {
    let client = tls::build_client(config).await?;
    let base = parse_server_url(&config.url)?;
    let probe = probe_url(&base);

    let sent = client.get(probe.clone()).timeout(PROBE_TIMEOUT).send();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        result = sent => result,
    };
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            warn!(url = %probe, error = %err, "could not reach trust server, continuing offline");
            return Ok(None);
        }
    };
    let status = response.status();
    if !status.is_success() && status != StatusCode::UNAUTHORIZED {
        warn!(url = %probe, status = status.as_u16(), "trust server not available, continuing offline");
        return Ok(None);
    }

    let mut challenges = ChallengeManager::new();
    challenges.add_response(&response);
    let challenges = Arc::new(challenges);
    let actions = permission.actions();

    let primary_credentials = match permission {
        Permission::ReadOnly => CredentialStore::anonymous(),
        Permission::ReadWrite | Permission::Admin => credentials.clone(),
    };
    let handlers: Vec<Arc<dyn AuthHandler>> = vec![
        Arc::new(TokenHandler::new(
            client.clone(),
            primary_credentials.clone(),
            gun.as_str(),
            actions,
        )),
        Arc::new(BasicHandler::new(primary_credentials)),
    ];
    let mut candidates: Vec<Arc<dyn RoundTripper>> = vec![Arc::new(AuthTransport::new(
        client.clone(),
        Authorizer::new(challenges.clone(), handlers),
    ))];

    // The read-only fallback authenticates with the configured credentials,
    // not anonymously: it only runs once the anonymous primary got a 401.
    if permission == Permission::ReadOnly {
        let handlers: Vec<Arc<dyn AuthHandler>> = vec![Arc::new(TokenHandler::new(
            client.clone(),
            credentials,
            gun.as_str(),
            actions,
        ))];
        candidates.push(Arc::new(AuthTransport::new(
            client,
            Authorizer::new(challenges, handlers),
        )));
    }

    debug!(
        url = %base,
        gun = %gun,
        actions = %actions.join(","),
        candidates = candidates.len(),
        "negotiated trust server transport"
    );
    let transport = FallbackTransport::new(candidates)?;
    Ok(Some(Arc::new(transport)))
}

fn parse_server_url(raw: &str) -> Result<Url, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(raw.trim()).map_err(|err| invalid(&err.to_string()))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid("a scheme and host are required"));
    }
    Ok(url)
}

/// `<server path>/v2/` with query and fragment dropped.
fn probe_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/v2/", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}
