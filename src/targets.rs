//! Resolution of the inventory objects a run reads from and writes to.

use thiserror::Error;
use tracing::debug;

use crate::backup::BackupDestination;
use crate::inventory::{Datacenter, Inventory, ManagedObject, ObjectKind};

/// Inventory objects a backup pass works against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupTargets {
    /// Datacenter holding the VMs.
    pub datacenter: Datacenter,
    /// Where artifacts are written.
    pub destination: BackupDestination,
}

impl BackupTargets {
    /// Root folder walked by discovery.
    #[must_use]
    pub const fn vm_root(&self) -> &ManagedObject {
        &self.datacenter.vm_folder
    }
}

/// Fatal errors raised while resolving targets.
#[derive(Debug, Error)]
pub enum SetupError<E>
where
    E: std::error::Error + 'static,
{
    /// No datacenter carries the configured name.
    #[error("datacenter {0} not found")]
    DatacenterNotFound(String),
    /// The backup folder is not a direct child of the datacenter's VM folder.
    #[error("backup folder {folder} not found in datacenter {datacenter}")]
    BackupFolderNotFound {
        /// Configured folder name.
        folder: String,
        /// Datacenter searched.
        datacenter: String,
    },
    /// The backup datastore does not exist in the datacenter.
    #[error("backup datastore {datastore} not found in datacenter {datacenter}")]
    DatastoreNotFound {
        /// Configured datastore name.
        datastore: String,
        /// Datacenter searched.
        datacenter: String,
    },
    /// The inventory could not be queried.
    #[error("inventory lookup failed: {0}")]
    Inventory(#[source] E),
}

/// Locates the datacenter, backup folder and backup datastore by name.
///
/// # Errors
///
/// Returns the [`SetupError`] variant naming the first missing target, or
/// [`SetupError::Inventory`] when a lookup fails.
pub async fn resolve_targets<I: Inventory>(
    inventory: &I,
    datacenter: &str,
    folder: &str,
    datastore: &str,
) -> Result<BackupTargets, SetupError<I::Error>> {
    let found = inventory
        .find_datacenter(datacenter)
        .await
        .map_err(SetupError::Inventory)?
        .ok_or_else(|| SetupError::DatacenterNotFound(datacenter.to_owned()))?;

    let backup_folder = find_child(inventory, &found.vm_folder, folder, ObjectKind::Folder)
        .await?
        .ok_or_else(|| SetupError::BackupFolderNotFound {
            folder: folder.to_owned(),
            datacenter: datacenter.to_owned(),
        })?;

    let backup_datastore = find_child(
        inventory,
        &found.datastore_folder,
        datastore,
        ObjectKind::Datastore,
    )
    .await?
    .ok_or_else(|| SetupError::DatastoreNotFound {
        datastore: datastore.to_owned(),
        datacenter: datacenter.to_owned(),
    })?;

    debug!(
        datacenter = %found.object.name,
        folder = %backup_folder.id,
        datastore = %backup_datastore.id,
        "resolved backup targets"
    );
    Ok(BackupTargets {
        datacenter: found,
        destination: BackupDestination {
            folder: backup_folder,
            datastore: backup_datastore,
        },
    })
}

async fn find_child<I: Inventory>(
    inventory: &I,
    container: &ManagedObject,
    name: &str,
    kind: ObjectKind,
) -> Result<Option<ManagedObject>, SetupError<I::Error>> {
    let children = inventory
        .list_children(container)
        .await
        .map_err(SetupError::Inventory)?;
    Ok(children
        .into_iter()
        .find(|child| child.kind == kind && child.name == name))
}
