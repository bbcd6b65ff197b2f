//! Trust operations orchestration.
//!
//! Every operation validates its input first, then negotiates a transport
//! only when it talks to the trust server, opens a repository handle through
//! the repository client and mutates or queries it. Network and collaborator
//! calls are raced against the caller's cancellation token.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::publish::{maybe_auto_publish, publish_changes};
use crate::certs::{import_root_cert, read_root_key};
use crate::commands::{
    guard_gun, validate_identifier, AddDelegationCommand, CreateRepoCommand,
    DeleteRepositoryCommand, RemoveDelegationCommand,
};
use crate::config::NotaryConfig;
use crate::delegation::{find_delegation, resolve_delegations};
use crate::error::Error;
use crate::gun::{Gun, RoleName};
use crate::keys::{and_filter, gun_filter, id_filter, root_filter, targets_filter, Key, KeyData, KeyFilter};
use crate::keystore::{private_key_path, KeyStore, KeyStoreFactory};
use crate::passphrase::PassphraseRetriever;
use crate::pipeline::{self, KeyStream};
use crate::repository::{
    CryptoService, DeleteRequest, LoadOptions, OpenRequest, Repository, Role, TrustPinConfig,
    TrustRepositoryClient, TufMetadata,
};
use crate::transport::credentials::CredentialStore;
use crate::transport::{build_transport_with_credentials, Permission, RoundTripper};

/// Administers trust repositories and the keys held in the local trust
/// directory.
pub struct TrustService {
    config: NotaryConfig,
    key_store: KeyStoreFactory,
    client: Arc<dyn TrustRepositoryClient>,
    retriever: Arc<dyn PassphraseRetriever>,
    credentials: CredentialStore,
}

impl std::fmt::Debug for TrustService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustService")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TrustService {
    /// Server credentials are read from `NOTARY_AUTH` once, here.
    pub fn new(
        config: NotaryConfig,
        key_store: KeyStoreFactory,
        client: Arc<dyn TrustRepositoryClient>,
        retriever: Arc<dyn PassphraseRetriever>,
    ) -> Self {
        Self {
            config,
            key_store,
            client,
            retriever,
            credentials: CredentialStore::from_os_env(),
        }
    }

    /// Replaces the trust server credentials.
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(&self) -> &NotaryConfig {
        &self.config
    }

    /// Initialises a repository with a root key and an optional pinned root
    /// certificate, publishing it when requested.
    pub async fn create_repository(
        &self,
        cmd: &CreateRepoCommand,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let gun = cmd.target.guard_has_gun()?;
        let root_key_path = non_empty_path(cmd.root_key_path.as_deref());
        let root_cert_path = non_empty_path(cmd.root_cert_path.as_deref());

        let transport = self.transport(&gun, Permission::ReadWrite, cancel).await?;
        let repository = self.open(&gun, transport, cancel).await?;

        let mut root_key_ids = self
            .import_root_key(repository.as_ref(), root_key_path, cancel)
            .await?;
        let root_certs = import_root_cert(root_cert_path).await?;
        // Without a key file but with a certificate, the repository client
        // picks the root key matching the certificate.
        if root_key_path.is_none() && root_cert_path.is_some() {
            root_key_ids.clear();
        }

        race(
            cancel,
            repository.initialize_with_certificate(root_key_ids, root_certs),
        )
        .await?
        .map_err(Error::repository("initialize repository"))?;
        info!(gun = %gun, "initialized trust repository");

        maybe_auto_publish(self, cmd.auto_publish, &gun, cancel).await
    }

    /// Deletes local trust data, and the remote repository when requested.
    pub async fn delete_repository(
        &self,
        cmd: &DeleteRepositoryCommand,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let gun = cmd.target.guard_has_gun()?;
        let transport = if cmd.delete_remote {
            self.transport(&gun, Permission::Admin, cancel).await?
        } else {
            None
        };

        let request = DeleteRequest {
            trust_dir: self.config.trust_dir.clone(),
            gun: gun.clone(),
            remote_url: self.config.remote_server.url.clone(),
            transport,
            delete_remote: cmd.delete_remote,
        };
        race(cancel, self.client.delete_trust_data(request))
            .await?
            .map_err(Error::repository("delete trust data"))?;

        let scope = if cmd.delete_remote {
            "local and remote"
        } else {
            "local"
        };
        info!(gun = %gun, "Successfully deleted {scope} trust data for repository");
        Ok(())
    }

    /// Delegates signing of `cmd.paths` to `cmd.delegation_keys`.
    ///
    /// The keys are also added to `targets/releases` so delegates can sign
    /// releases.
    pub async fn add_delegation(
        &self,
        cmd: &AddDelegationCommand,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let gun = cmd.target.guard_has_gun()?;
        cmd.guard_keys_and_paths()?;

        let repository = self.open(&gun, None, cancel).await?;
        for role in delegation_roles(&cmd.role) {
            race(
                cancel,
                repository.add_delegation(&role, &cmd.delegation_keys, &cmd.paths),
            )
            .await?
            .map_err(Error::repository("create delegation"))?;
            debug!(gun = %gun, role = %role, keys = cmd.delegation_keys.len(), "staged delegation");
        }

        maybe_auto_publish(self, cmd.auto_publish, &gun, cancel).await
    }

    /// Removes one delegate key from `targets/releases` and `cmd.role`.
    pub async fn remove_delegation(
        &self,
        cmd: &RemoveDelegationCommand,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let gun = cmd.target.guard_has_gun()?;
        let key_id = cmd.guard_key_id()?;

        let repository = self.open(&gun, None, cancel).await?;
        let key_ids = [key_id];
        for role in delegation_roles(&cmd.role) {
            race(cancel, repository.remove_delegation_keys(&role, &key_ids))
                .await?
                .map_err(Error::repository("remove delegation"))?;
            debug!(gun = %gun, role = %role, key_id = %key_ids[0], "staged delegation key removal");
        }

        maybe_auto_publish(self, cmd.auto_publish, &gun, cancel).await
    }

    /// Streams every key of a freshly opened key store.
    pub async fn stream_keys(&self, cancel: &CancellationToken) -> Result<KeyStream, Error> {
        pipeline::stream_keys(cancel, &self.key_store).await
    }

    /// Lists the keys matching `filter`.
    pub async fn list_keys(
        &self,
        cancel: &CancellationToken,
        filter: KeyFilter,
    ) -> Result<Vec<Key>, Error> {
        let source = self.stream_keys(cancel).await?;
        Ok(pipeline::collect_keys(pipeline::reduce(cancel, source, filter)).await)
    }

    pub async fn list_root_keys(&self, cancel: &CancellationToken) -> Result<Vec<Key>, Error> {
        self.list_keys(cancel, root_filter()).await
    }

    pub async fn list_targets(&self, cancel: &CancellationToken) -> Result<Vec<Key>, Error> {
        self.list_keys(cancel, targets_filter()).await
    }

    /// First key whose id starts with `id`, which must be at least seven
    /// characters long.
    pub async fn get_key_by_id(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> Result<Option<Key>, Error> {
        validate_identifier(id)?;
        let source = self.stream_keys(cancel).await?;
        let mut matches = pipeline::reduce(cancel, source, id_filter(id));
        Ok(matches.next().await)
    }

    /// Targets key of the repository `gun`.
    pub async fn get_target_by_gun(
        &self,
        cancel: &CancellationToken,
        gun: &Gun,
    ) -> Result<Option<Key>, Error> {
        let filter = and_filter([targets_filter(), gun_filter(gun.as_str())]);
        let source = self.stream_keys(cancel).await?;
        let mut matches = pipeline::reduce(cancel, source, filter);
        Ok(matches.next().await)
    }

    /// Delegate keys of the target's repository grouped by signer.
    pub async fn list_delegates(
        &self,
        cancel: &CancellationToken,
        target: Option<&Key>,
    ) -> Result<HashMap<String, Vec<Key>>, Error> {
        let roles = self.target_delegation_roles(cancel, target).await?;
        Ok(resolve_delegations(&roles))
    }

    /// Delegate key of `role` whose id starts with `key_id`.
    pub async fn get_delegation(
        &self,
        cancel: &CancellationToken,
        target: Option<&Key>,
        role: &RoleName,
        key_id: &str,
    ) -> Result<Option<Key>, Error> {
        let roles = self.target_delegation_roles(cancel, target).await?;
        Ok(find_delegation(&roles, role, key_id))
    }

    /// Loads the full signed metadata of `gun` from the trust server.
    pub async fn fetch_metadata(
        &self,
        cancel: &CancellationToken,
        gun: &Gun,
    ) -> Result<TufMetadata, Error> {
        let gun = guard_gun(gun.as_str())?;
        let transport = self.transport(&gun, Permission::ReadOnly, cancel).await?;
        let repository = self.open(&gun, transport.clone(), cancel).await?;
        let options = LoadOptions {
            gun: gun.clone(),
            trust_pinning: self.trust_pinning()?,
            transport,
        };
        race(cancel, self.client.load_full_repo(repository.as_ref(), options))
            .await?
            .map_err(Error::repository("load trust metadata"))
    }

    /// Exports the private key files relevant to `gun`, by key id.
    ///
    /// Root keys are always exported and carry no GUN. Targets and snapshot
    /// keys are exported only when the key store records them for `gun`.
    pub async fn fetch_keys(
        &self,
        cancel: &CancellationToken,
        gun: &Gun,
    ) -> Result<HashMap<String, KeyData>, Error> {
        let gun = guard_gun(gun.as_str())?;
        let transport = self.transport(&gun, Permission::ReadOnly, cancel).await?;
        let store = (self.key_store)()?;
        let repository = self.open(&gun, transport, cancel).await?;
        let crypto = repository.crypto_service();

        let mut keys = HashMap::new();
        for key_id in crypto.list_keys(&RoleName::root()) {
            let data = self.export_key(crypto.as_ref(), &key_id, Gun::default()).await?;
            keys.insert(key_id, data);
        }
        for role in [RoleName::targets(), RoleName::snapshot()] {
            for key_id in crypto.list_keys(&role) {
                if !recorded_for(store.as_ref(), &key_id, &gun)? {
                    continue;
                }
                let data = self.export_key(crypto.as_ref(), &key_id, gun.clone()).await?;
                keys.insert(key_id, data);
            }
        }
        debug!(gun = %gun, keys = keys.len(), "exported private keys");
        Ok(keys)
    }

    /// Publishes the staged changes of `gun`.
    pub async fn publish(&self, cancel: &CancellationToken, gun: &Gun) -> Result<(), Error> {
        let gun = guard_gun(gun.as_str())?;
        info!(gun = %gun, "Publishing changes");
        publish_changes(self, &gun, cancel).await
    }

    pub(super) async fn transport(
        &self,
        gun: &Gun,
        permission: Permission,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<dyn RoundTripper>>, Error> {
        build_transport_with_credentials(
            &self.config.remote_server,
            gun,
            permission,
            self.credentials.clone(),
            cancel,
        )
        .await
    }

    pub(super) fn trust_pinning(&self) -> Result<TrustPinConfig, Error> {
        Ok(self.config.trust_pin_config()?)
    }

    /// Opens `gun` online when a transport is given, offline otherwise.
    pub(super) async fn open(
        &self,
        gun: &Gun,
        transport: Option<Arc<dyn RoundTripper>>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Repository>, Error> {
        let request = OpenRequest {
            trust_dir: self.config.trust_dir.clone(),
            gun: gun.clone(),
            remote_url: self.config.remote_server.url.clone(),
            transport,
            retriever: self.retriever.clone(),
            trust_pinning: self.trust_pinning()?,
        };
        race(cancel, self.client.open(request))
            .await?
            .map_err(Error::repository("open repository"))
    }

    /// Imports the root key file, or picks an existing root key. Only the
    /// first candidate is used.
    async fn import_root_key(
        &self,
        repository: &dyn Repository,
        path: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, Error> {
        let crypto = repository.crypto_service();
        let candidates = match path {
            Some(path) => {
                let pem = read_root_key(path).await?;
                let key_id = race(
                    cancel,
                    crypto.import_private_key(&RoleName::root(), &Gun::default(), &pem),
                )
                .await?
                .map_err(Error::repository("import root key"))?;
                vec![key_id]
            }
            None => crypto.list_keys(&RoleName::root()),
        };

        match candidates.into_iter().next() {
            Some(root_key_id) => {
                info!(root_key_id = %root_key_id, "Root key found");
                Ok(vec![root_key_id])
            }
            None => Ok(Vec::new()),
        }
    }

    async fn target_delegation_roles(
        &self,
        cancel: &CancellationToken,
        target: Option<&Key>,
    ) -> Result<Vec<Role>, Error> {
        let Some(target) = target else {
            return Ok(Vec::new());
        };
        let gun = guard_gun(&target.gun)?;
        let transport = self.transport(&gun, Permission::ReadOnly, cancel).await?;
        let repository = self.open(&gun, transport, cancel).await?;
        race(cancel, repository.get_delegation_roles())
            .await?
            .map_err(Error::repository("list delegation roles"))
    }

    async fn export_key(
        &self,
        crypto: &dyn CryptoService,
        key_id: &str,
        gun: Gun,
    ) -> Result<KeyData, Error> {
        let role = crypto
            .get_private_key_role(key_id)
            .map_err(Error::repository("read private key"))?;
        let path = private_key_path(&self.config.trust_dir, key_id);
        let key = tokio::fs::read(&path)
            .await
            .map_err(Error::io("error reading private key file", &path))?;
        Ok(KeyData { key, role, gun })
    }
}

/// Awaits `future` unless `cancel` fires first.
pub(super) async fn race<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = future => Ok(output),
    }
}

/// `targets/releases` first, then the requested role.
fn delegation_roles(role: &RoleName) -> Vec<RoleName> {
    let releases = RoleName::releases();
    if *role == releases {
        vec![releases]
    } else {
        vec![releases, role.clone()]
    }
}

fn non_empty_path(path: Option<&Path>) -> Option<&Path> {
    path.filter(|path| !path.as_os_str().is_empty())
}

fn recorded_for(store: &dyn KeyStore, key_id: &str, gun: &Gun) -> Result<bool, Error> {
    Ok(store.get_key_info(key_id)?.gun == *gun)
}
