//! Maps delegation role records to the signers they represent.

use std::collections::HashMap;

use crate::gun::{RoleName, RELEASES_ROLE, ROOT_ROLE, SNAPSHOT_ROLE, TARGETS_ROLE, TIMESTAMP_ROLE};
use crate::keys::Key;
use crate::repository::Role;

/// Signer shown for the top-level targets role and the releases delegation.
pub const SIGNER_DISPLAY_NAME: &str = "Repo Admin";

const DELEGATION_PREFIX: &str = "targets/";

/// Returns `true` for roles that never appear as a delegate: the canonical
/// roles and the releases delegation every delegate is also added to.
pub fn is_reserved_role(role: &RoleName) -> bool {
    matches!(
        role.as_str(),
        ROOT_ROLE | TARGETS_ROLE | SNAPSHOT_ROLE | TIMESTAMP_ROLE | RELEASES_ROLE
    )
}

/// Display name of the signer behind `role`.
pub fn role_to_signer(role: &RoleName) -> String {
    match role.as_str() {
        TARGETS_ROLE | RELEASES_ROLE => SIGNER_DISPLAY_NAME.to_string(),
        name => name
            .strip_prefix(DELEGATION_PREFIX)
            .unwrap_or(name)
            .to_string(),
    }
}

/// Inverse of [`role_to_signer`] for delegation roles.
pub fn signer_to_role(signer: &str) -> RoleName {
    RoleName::delegation(signer)
}

/// Groups the key ids of every non-reserved role by signer name.
///
/// Gun is left empty on the returned keys. When two roles resolve to the
/// same signer the later record wins.
pub fn resolve_delegations(roles: &[Role]) -> HashMap<String, Vec<Key>> {
    let mut delegates = HashMap::new();
    for role in roles.iter().filter(|role| !is_reserved_role(&role.name)) {
        let signer = role_to_signer(&role.name);
        let keys = role
            .key_ids
            .iter()
            .map(|id| Key::new(id.clone(), "", signer.clone()))
            .collect();
        delegates.insert(signer, keys);
    }
    delegates
}

/// First key of the delegation `role` whose id starts with `key_id_prefix`.
pub fn find_delegation(roles: &[Role], role: &RoleName, key_id_prefix: &str) -> Option<Key> {
    roles
        .iter()
        .filter(|candidate| !is_reserved_role(&candidate.name) && &candidate.name == role)
        .find_map(|candidate| {
            let signer = role_to_signer(&candidate.name);
            candidate
                .key_ids
                .iter()
                .find(|id| id.starts_with(key_id_prefix))
                .map(|id| Key::new(id.clone(), "", signer))
        })
}
