//! HTTP client construction from the remote server TLS settings.

use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Client, Identity};

use super::TransportError;
use crate::config::RemoteServerConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the client used for the probe, token requests and repository
/// traffic. Connections are not pooled.
///
/// A configured CA bundle replaces the built-in roots. The client
/// certificate and key must be configured together.
pub async fn build_client(config: &RemoteServerConfig) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(0)
        .danger_accept_invalid_certs(config.skip_tls_verify);

    if let Some(path) = &config.root_ca {
        let bundle = read_pem(path).await?;
        let certs = Certificate::from_pem_bundle(&bundle)
            .map_err(|err| TransportError::Tls(format!("invalid CA bundle {}: {err}", path.display())))?;
        if certs.is_empty() {
            return Err(TransportError::Tls(format!(
                "no certificates in CA bundle {}",
                path.display()
            )));
        }
        builder = builder.tls_built_in_root_certs(false);
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    match (&config.tls_client_cert, &config.tls_client_key) {
        (Some(cert), Some(key)) => {
            let mut pem = read_pem(cert).await?;
            pem.push(b'\n');
            pem.extend(read_pem(key).await?);
            let identity = Identity::from_pem(&pem)
                .map_err(|err| TransportError::Tls(format!("invalid client certificate: {err}")))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => return Err(TransportError::ClientCertPair),
    }

    builder
        .build()
        .map_err(|err| TransportError::Tls(format!("could not build HTTP client: {err}")))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    tokio::fs::read(path)
        .await
        .map_err(|err| TransportError::Tls(format!("could not read {}: {err}", path.display())))
}
