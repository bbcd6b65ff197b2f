//! Root key and root certificate files supplied when creating a repository.

use std::path::Path;

use tracing::debug;
use x509_parser::prelude::parse_x509_certificate;
use x509_parser::public_key::PublicKey as CertificateKey;

use crate::error::Error;
use crate::repository::{KeyAlgorithm, PublicKey};

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const ENCRYPTED_MARKER: &str = "ENCRYPTED";
const PROC_TYPE_HEADER: &str = "Proc-Type";

/// Reads a root private key file, which must hold an encrypted PEM key.
///
/// Encrypted PKCS#8 (`ENCRYPTED PRIVATE KEY`) and legacy PEM encryption
/// (`Proc-Type: 4,ENCRYPTED`) are both accepted. The original file bytes are
/// returned for the repository client to decrypt.
pub async fn read_root_key(path: &Path) -> Result<Vec<u8>, Error> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(Error::io("error reading input root key file", path))?;
    let block = pem::parse(&bytes).map_err(|err| Error::InvalidPem {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let encrypted = block.tag().contains(ENCRYPTED_MARKER)
        || block
            .headers()
            .get(PROC_TYPE_HEADER)
            .is_some_and(|value| value.contains(ENCRYPTED_MARKER));
    if !encrypted {
        return Err(Error::RootKeyNotEncrypted(path.to_path_buf()));
    }
    Ok(bytes)
}

/// Converts the PEM certificate at `path` into the public key the root role
/// will be pinned to. No path means no certificate.
pub async fn import_root_cert(path: Option<&Path>) -> Result<Vec<PublicKey>, Error> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let invalid = |reason: String| Error::InvalidPem {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(Error::io("error reading certificate file", path))?;
    let block = pem::parse(&bytes).map_err(|err| invalid(err.to_string()))?;
    if block.tag() != CERTIFICATE_TAG {
        return Err(invalid(format!(
            "expected a {CERTIFICATE_TAG} block, found {}",
            block.tag()
        )));
    }

    let (_, cert) = parse_x509_certificate(block.contents())
        .map_err(|err| invalid(format!("parsing certificate PEM bytes to x509 certificate: {err}")))?;
    let algorithm = match cert.public_key().parsed() {
        Ok(CertificateKey::EC(_)) => KeyAlgorithm::EcdsaX509,
        Ok(CertificateKey::RSA(_)) => KeyAlgorithm::RsaX509,
        Ok(_) => return Err(invalid("unsupported certificate key algorithm".to_string())),
        Err(err) => return Err(invalid(format!("unreadable certificate public key: {err}"))),
    };

    // The key material of an x509 key is the PEM encoding of the certificate.
    let encoded = pem::encode(&pem::Pem::new(CERTIFICATE_TAG, block.contents()));
    let key = PublicKey::new(algorithm, encoded.into_bytes());
    debug!(path = %path.display(), key_id = %key.id, algorithm = %key.algorithm, "imported root certificate");
    Ok(vec![key])
}
