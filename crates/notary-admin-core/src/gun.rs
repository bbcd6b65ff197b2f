//! Repository names (GUNs) and TUF role names.
//!
//! A GUN is an opaque identifier for a trust repository. Role names form a
//! hierarchy rooted at the four canonical TUF roles; delegations live below
//! `targets/`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Characters stripped from both ends of a GUN.
const GUN_TRIM_CHARS: [char; 4] = [' ', '\t', '\r', '\n'];

/// Canonical root role.
pub const ROOT_ROLE: &str = "root";
/// Canonical targets role.
pub const TARGETS_ROLE: &str = "targets";
/// Canonical snapshot role.
pub const SNAPSHOT_ROLE: &str = "snapshot";
/// Canonical timestamp role.
pub const TIMESTAMP_ROLE: &str = "timestamp";
/// Delegation every delegate key is also added to so it can sign releases.
pub const RELEASES_ROLE: &str = "targets/releases";

/// Globally Unique Name identifying a trust repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gun(String);

impl Gun {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns a copy trimmed of spaces, tabs, carriage returns and line feeds.
    ///
    /// Only the ends are trimmed; interior whitespace is part of the name.
    pub fn sanitized(&self) -> Gun {
        sanitize_gun(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Gun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Gun {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Gun {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Trims the GUN whitespace set from both ends of `value`.
pub fn sanitize_gun(value: &str) -> Gun {
    Gun(value.trim_matches(&GUN_TRIM_CHARS[..]).to_string())
}

/// Hierarchical TUF role name such as `targets/releases`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn root() -> Self {
        Self::new(ROOT_ROLE)
    }

    pub fn targets() -> Self {
        Self::new(TARGETS_ROLE)
    }

    pub fn snapshot() -> Self {
        Self::new(SNAPSHOT_ROLE)
    }

    pub fn timestamp() -> Self {
        Self::new(TIMESTAMP_ROLE)
    }

    pub fn releases() -> Self {
        Self::new(RELEASES_ROLE)
    }

    /// Builds the delegation role `targets/<name>`.
    ///
    /// Joins like a path: redundant separators between the two parts are
    /// collapsed, so `delegation("/releases")` is still `targets/releases`.
    pub fn delegation(name: &str) -> Self {
        let name = name.trim_matches('/');
        if name.is_empty() {
            return Self::targets();
        }
        Self(format!("{TARGETS_ROLE}/{name}"))
    }

    /// Returns `true` for root, targets, snapshot and timestamp.
    pub fn is_base_role(&self) -> bool {
        matches!(
            self.0.as_str(),
            ROOT_ROLE | TARGETS_ROLE | SNAPSHOT_ROLE | TIMESTAMP_ROLE
        )
    }

    /// Returns `true` for roles nested under `targets/`.
    pub fn is_delegation(&self) -> bool {
        self.0
            .strip_prefix(TARGETS_ROLE)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| !rest.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for RoleName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RoleName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
