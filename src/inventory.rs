//! Abstraction over the virtualization management platform.
//!
//! The backup engine never talks to the platform directly. It borrows
//! [`ManagedObject`] handles from an [`Inventory`] implementation and submits
//! mutating operations that come back as [`TaskHandle`]s, which are then
//! observed through [`Inventory::poll_task`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Name of the transient snapshot taken before every clone.
pub const BACKUP_SNAPSHOT_NAME: &str = "pre_backup_snapshot";

/// Kind of a remote inventory entity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ObjectKind {
    /// A virtual machine or template.
    VirtualMachine,
    /// A folder that may contain VMs and other folders.
    Folder,
    /// A datastore.
    Datastore,
    /// A datacenter.
    Datacenter,
    /// Anything else (networks, hosts, vApps). Ignored by discovery.
    Other,
}

impl ObjectKind {
    /// Maps a platform managed-object type name onto a kind.
    #[must_use]
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "VirtualMachine" => Self::VirtualMachine,
            "Folder" => Self::Folder,
            "Datastore" => Self::Datastore,
            "Datacenter" => Self::Datacenter,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::VirtualMachine => "VirtualMachine",
            Self::Folder => "Folder",
            Self::Datastore => "Datastore",
            Self::Datacenter => "Datacenter",
            Self::Other => "Other",
        };
        f.write_str(label)
    }
}

/// Borrowed handle to a remote entity.
///
/// `name` is unique within the parent container only; `id` is the
/// platform-specific identifier used to address the object in later calls.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ManagedObject {
    /// Platform identifier (an inventory path for the `govc` backend).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Entity kind.
    pub kind: ObjectKind,
}

impl ManagedObject {
    /// Creates a handle.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    /// Returns `true` for virtual machines (including templates).
    #[must_use]
    pub const fn is_vm(&self) -> bool {
        matches!(self.kind, ObjectKind::VirtualMachine)
    }

    /// Returns `true` for folders.
    #[must_use]
    pub const fn is_folder(&self) -> bool {
        matches!(self.kind, ObjectKind::Folder)
    }
}

/// Reference to a snapshot living on a VM.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SnapshotRef {
    /// Identifier of the VM owning the snapshot.
    pub vm_id: String,
    /// Snapshot name.
    pub name: String,
    /// Managed object id, when the inventory reported one.
    pub id: Option<String>,
}

impl SnapshotRef {
    /// Returns the most specific way to address the snapshot.
    ///
    /// The managed object id is unique on the VM; the name is not.
    #[must_use]
    pub fn selector(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Parameters for a snapshot request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRequest {
    /// Snapshot name.
    pub name: String,
    /// Whether guest memory is captured.
    pub include_memory: bool,
    /// Whether the guest filesystem is quiesced.
    pub quiesce: bool,
}

impl SnapshotRequest {
    /// Crash-consistent snapshot used before cloning: no memory, no quiesce.
    #[must_use]
    pub fn pre_backup() -> Self {
        Self {
            name: BACKUP_SNAPSHOT_NAME.to_owned(),
            include_memory: false,
            quiesce: false,
        }
    }
}

/// Clone specification for producing a backup template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloneSpec {
    /// Name of the new object (the backup artifact name).
    pub name: String,
    /// Snapshot the clone is taken from.
    pub snapshot: SnapshotRef,
    /// Destination folder.
    pub folder: ManagedObject,
    /// Destination datastore.
    pub datastore: ManagedObject,
    /// Whether the clone is marked as a template.
    pub template: bool,
    /// Whether the clone carries the source memory state.
    pub memory: bool,
}

/// Handle to an in-flight remote operation.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TaskHandle {
    /// Identifier assigned by the inventory.
    pub id: String,
    /// Short description used in log lines.
    pub description: String,
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.description)
    }
}

/// Value produced by a successful task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskPayload {
    /// A snapshot created by the task.
    Snapshot(SnapshotRef),
    /// An inventory object created by the task.
    Object(ManagedObject),
}

/// Remote-side state of a task, as observed by one poll.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// The task has not reached a terminal state yet.
    Running,
    /// The task finished, optionally with a result.
    Succeeded(Option<TaskPayload>),
    /// The task finished with an error message.
    Failed(String),
}

/// A datacenter and the containers backups are resolved from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datacenter {
    /// The datacenter itself.
    pub object: ManagedObject,
    /// Root folder holding the datacenter's VMs.
    pub vm_folder: ManagedObject,
    /// Folder holding the datacenter's datastores.
    pub datastore_folder: ManagedObject,
}

/// Future returned by inventory operations.
pub type InventoryFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capabilities the backup engine needs from the management platform.
///
/// Implementations share one management session across all calls. The engine
/// never issues two mutating calls concurrently.
pub trait Inventory: Sync {
    /// Transport or session error returned by the implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Looks up a datacenter by name.
    fn find_datacenter<'a>(
        &'a self,
        name: &'a str,
    ) -> InventoryFuture<'a, Option<Datacenter>, Self::Error>;

    /// Lists the direct children of a container in native order.
    fn list_children<'a>(
        &'a self,
        container: &'a ManagedObject,
    ) -> InventoryFuture<'a, Vec<ManagedObject>, Self::Error>;

    /// Reports whether a VM has an assigned resource pool.
    fn is_assignable<'a>(&'a self, vm: &'a ManagedObject)
    -> InventoryFuture<'a, bool, Self::Error>;

    /// Submits a snapshot of `vm`. The task succeeds with a
    /// [`TaskPayload::Snapshot`].
    fn create_snapshot<'a>(
        &'a self,
        vm: &'a ManagedObject,
        request: &'a SnapshotRequest,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error>;

    /// Submits removal of a snapshot. The task succeeds with no payload.
    fn remove_snapshot<'a>(
        &'a self,
        snapshot: &'a SnapshotRef,
        remove_children: bool,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error>;

    /// Submits a clone of `vm`. The task succeeds with a
    /// [`TaskPayload::Object`] for the new template.
    fn clone_as_template<'a>(
        &'a self,
        vm: &'a ManagedObject,
        spec: &'a CloneSpec,
    ) -> InventoryFuture<'a, TaskHandle, Self::Error>;

    /// Submits destruction of a VM or template. The task succeeds with no
    /// payload.
    fn destroy<'a>(&'a self, object: &'a ManagedObject)
    -> InventoryFuture<'a, TaskHandle, Self::Error>;

    /// Observes the current state of a task.
    fn poll_task<'a>(&'a self, task: &'a TaskHandle)
    -> InventoryFuture<'a, TaskState, Self::Error>;

    /// Abandons a task that is still running and stops tracking it.
    ///
    /// The remote operation is aborted where the platform allows it. Polling
    /// a cancelled task afterwards is an error.
    fn cancel_task<'a>(&'a self, task: &'a TaskHandle) -> InventoryFuture<'a, (), Self::Error>;
}
