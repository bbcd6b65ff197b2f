//! Username/password material for authenticating against the trust server.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

/// Environment variable holding `base64("<username>:<password>")`.
pub const NOTARY_AUTH_ENV: &str = "NOTARY_AUTH";

/// Credentials handed to the basic and token handlers.
///
/// An empty username means anonymous access: no basic auth header is sent
/// and tokens are requested without credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialStore {
    username: String,
    password: String,
}

impl CredentialStore {
    /// Store that never yields credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reads [`NOTARY_AUTH_ENV`] from the process environment.
    pub fn from_os_env() -> Self {
        Self::from_encoded(std::env::var(NOTARY_AUTH_ENV).ok().as_deref())
    }

    /// Decodes a `NOTARY_AUTH` value. Anything malformed yields anonymous
    /// credentials; the password is trimmed of surrounding whitespace.
    pub fn from_encoded(value: Option<&str>) -> Self {
        let Some(value) = value.filter(|value| !value.is_empty()) else {
            return Self::anonymous();
        };
        let decoded = match STANDARD.decode(value.trim()) {
            Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
            Err(_) => {
                warn!("Could not base64-decode authentication string");
                return Self::anonymous();
            }
        };
        match decoded.split_once(':') {
            Some(("", _)) => {
                warn!("Authentication string with zero-length username");
                Self::anonymous()
            }
            Some((username, password)) => Self::basic(username, password.trim()),
            None => {
                warn!("Malformatted authentication string; format must be <username>:<password>");
                Self::anonymous()
            }
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }

    /// Username and password, or `None` for anonymous access.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.is_anonymous() {
            return None;
        }
        Some((self.username.as_str(), self.password.as_str()))
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
