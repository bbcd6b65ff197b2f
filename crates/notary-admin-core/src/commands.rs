//! Command payloads accepted by the trust service.
//!
//! Commands are plain data. Their guards run before the service performs any
//! network or file-system work so that bad input never reaches a
//! collaborator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::gun::{sanitize_gun, Gun, RoleName};
use crate::repository::PublicKey;

/// Shortest key id prefix accepted by lookups by id.
pub const MIN_ID_PREFIX_LEN: usize = 7;

/// Identifies the repository a command applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCommand {
    #[serde(default)]
    pub gun: Gun,
}

impl TargetCommand {
    pub fn new(gun: impl Into<Gun>) -> Self {
        Self { gun: gun.into() }
    }

    /// Returns the sanitised GUN, or [`Error::GunMandatory`] when it is blank.
    pub fn guard_has_gun(&self) -> Result<Gun, Error> {
        let gun = self.gun.sanitized();
        if gun.is_empty() {
            return Err(Error::GunMandatory);
        }
        Ok(gun)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRepoCommand {
    #[serde(flatten)]
    pub target: TargetCommand,
    /// Encrypted root private key to import. When absent an existing root
    /// key from the local store is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_key_path: Option<PathBuf>,
    /// PEM root certificate to pin instead of a generated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub auto_publish: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRepositoryCommand {
    #[serde(flatten)]
    pub target: TargetCommand,
    /// Also delete the repository from the remote server.
    #[serde(default)]
    pub delete_remote: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDelegationCommand {
    #[serde(flatten)]
    pub target: TargetCommand,
    pub role: RoleName,
    #[serde(default)]
    pub delegation_keys: Vec<PublicKey>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub auto_publish: bool,
}

impl AddDelegationCommand {
    /// Requires at least one public key and at least one path.
    pub fn guard_keys_and_paths(&self) -> Result<(), Error> {
        if self.delegation_keys.is_empty() || self.paths.is_empty() {
            return Err(Error::PublicKeysAndPathsMandatory);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDelegationCommand {
    #[serde(flatten)]
    pub target: TargetCommand,
    pub key_id: String,
    pub role: RoleName,
    #[serde(default)]
    pub auto_publish: bool,
}

impl RemoveDelegationCommand {
    /// Returns the trimmed key id, rejecting a blank one.
    pub fn guard_key_id(&self) -> Result<String, Error> {
        let key_id = self.key_id.trim();
        if key_id.is_empty() {
            return Err(Error::InvalidIdentifier(
                "a key id is required to remove a delegation".to_string(),
            ));
        }
        Ok(key_id.to_string())
    }
}

/// Rejects id prefixes shorter than [`MIN_ID_PREFIX_LEN`] characters.
pub fn validate_identifier(id: &str) -> Result<(), Error> {
    if id.chars().count() < MIN_ID_PREFIX_LEN {
        return Err(Error::InvalidIdentifier(format!(
            "{id:?} is shorter than {MIN_ID_PREFIX_LEN} characters"
        )));
    }
    Ok(())
}

/// Convenience for callers holding a raw GUN string.
pub fn guard_gun(gun: &str) -> Result<Gun, Error> {
    let gun = sanitize_gun(gun);
    if gun.is_empty() {
        return Err(Error::GunMandatory);
    }
    Ok(gun)
}
