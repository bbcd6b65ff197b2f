//! Publishing staged repository changes.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::core::{race, TrustService};
use crate::error::Error;
use crate::gun::Gun;
use crate::transport::Permission;

/// Publishes `gun` after a successful local mutation when `requested`.
///
/// Failures are reported as [`Error::Publish`]: the local change stays
/// applied and only the publish needs retrying.
pub(crate) async fn maybe_auto_publish(
    service: &TrustService,
    requested: bool,
    gun: &Gun,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    if !requested {
        return Ok(());
    }
    info!(gun = %gun, "Auto-publishing changes");
    publish_changes(service, gun, cancel).await.map_err(|source| {
        warn!(gun = %gun, error = %source, "auto-publish failed, changes remain staged locally");
        Error::Publish {
            gun: gun.clone(),
            source: Box::new(source),
        }
    })
}

/// Opens `gun` with a fresh read-write transport and publishes it.
pub(crate) async fn publish_changes(
    service: &TrustService,
    gun: &Gun,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let transport = service.transport(gun, Permission::ReadWrite, cancel).await?;
    let repository = service.open(gun, transport, cancel).await?;
    race(cancel, repository.publish())
        .await?
        .map_err(Error::repository("publish"))?;
    info!(gun = %repository.gun(), "published changes");
    Ok(())
}
