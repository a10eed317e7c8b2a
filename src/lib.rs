//! Unattended backups of vSphere virtual machines.
//!
//! A pass discovers the assignable VMs under a datacenter's VM folder, clones
//! each one through a transient snapshot into a template inside the backup
//! folder, and prunes each VM's oldest templates beyond a keep-count. The
//! engine talks to the platform through the [`Inventory`] trait; the
//! [`GovcInventory`] implementation drives the `govc` CLI.

pub mod artifact;
pub mod backup;
pub mod config;
pub mod discovery;
pub mod govc;
pub mod inventory;
pub mod retention;
pub mod run;
pub mod targets;
pub mod task;
pub mod telemetry;
pub mod test_support;

pub use artifact::{ArtifactMatch, ArtifactNameError, artifact_name, parse_artifact_timestamp};
pub use backup::{BackupDestination, BackupOrchestrator, BackupReport, BackupStatus};
pub use config::{BackupConfig, ConfigError};
pub use discovery::{DiscoveryError, ExclusionSets, collect_vms};
pub use govc::{GovcConfig, GovcError, GovcInventory};
pub use inventory::{
    BACKUP_SNAPSHOT_NAME, CloneSpec, Datacenter, Inventory, InventoryFuture, ManagedObject,
    ObjectKind, SnapshotRef, SnapshotRequest, TaskHandle, TaskPayload, TaskState,
};
pub use retention::{PruneSummary, RetentionError, RetentionPruner};
pub use run::{RunDriver, RunSummary};
pub use targets::{BackupTargets, SetupError, resolve_targets};
pub use task::{TaskOutcome, TaskTracker};
pub use telemetry::{LoggingOptions, TelemetryError, init_logging};
