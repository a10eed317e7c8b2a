//! Per-VM backup: snapshot, clone to template, snapshot cleanup, retention.
//!
//! Steps run strictly in sequence. The snapshot is removed on every path on
//! which it was created, including a failed clone, and retention only runs
//! after a successful clone.

use std::fmt;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::artifact::artifact_name;
use crate::inventory::{
    CloneSpec, Inventory, ManagedObject, SnapshotRef, SnapshotRequest, TaskPayload,
};
use crate::retention::{DEFAULT_KEEP_COUNT, PruneSummary, RetentionPruner};
use crate::task::{TaskOutcome, TaskTracker};

/// Delay between submitting the snapshot and tracking it.
pub const DEFAULT_SNAPSHOT_SETTLE_DELAY: Duration = Duration::from_secs(15);

/// Where backups are written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupDestination {
    /// Folder receiving the templates.
    pub folder: ManagedObject,
    /// Datastore holding the templates' disks.
    pub datastore: ManagedObject,
}

/// Terminal state of one VM's backup attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackupStatus {
    /// The clone succeeded.
    Completed {
        /// Name of the new backup artifact.
        artifact: String,
        /// Retention result, or the retention error message.
        retention: Result<PruneSummary, String>,
    },
    /// No snapshot could be taken; nothing else was attempted.
    SnapshotFailed {
        /// Failure description.
        reason: String,
    },
    /// The clone failed; the snapshot was cleaned up and retention skipped.
    CloneFailed {
        /// Name the artifact would have had.
        artifact: String,
        /// Failure description.
        reason: String,
    },
}

/// Report for one VM's backup attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupReport {
    /// VM name.
    pub vm: String,
    /// How the attempt ended.
    pub status: BackupStatus,
    /// Whether the pre-backup snapshot was removed. `false` when it was
    /// never created or its removal failed.
    pub snapshot_removed: bool,
}

impl BackupReport {
    /// Returns `true` when a backup artifact was produced.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.status, BackupStatus::Completed { .. })
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { artifact, .. } => write!(f, "backed up as {artifact}"),
            Self::SnapshotFailed { reason } => write!(f, "snapshot failed: {reason}"),
            Self::CloneFailed { reason, .. } => write!(f, "clone failed: {reason}"),
        }
    }
}

/// Drives the backup of a single VM.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackupOrchestrator {
    tracker: TaskTracker,
    pruner: RetentionPruner,
    snapshot_settle_delay: Duration,
    keep_count: usize,
}

impl Default for BackupOrchestrator {
    fn default() -> Self {
        Self::new(TaskTracker::new())
    }
}

impl BackupOrchestrator {
    /// Creates an orchestrator using `tracker` for every remote operation.
    #[must_use]
    pub const fn new(tracker: TaskTracker) -> Self {
        Self {
            tracker,
            pruner: RetentionPruner::new(tracker),
            snapshot_settle_delay: DEFAULT_SNAPSHOT_SETTLE_DELAY,
            keep_count: DEFAULT_KEEP_COUNT,
        }
    }

    /// Overrides the delay between snapshot submission and tracking.
    ///
    /// This is primarily used by tests to keep scenarios fast.
    #[must_use]
    pub const fn with_snapshot_settle_delay(mut self, delay: Duration) -> Self {
        self.snapshot_settle_delay = delay;
        self
    }

    /// Overrides the number of artifacts kept per VM.
    #[must_use]
    pub const fn with_keep_count(mut self, keep_count: usize) -> Self {
        self.keep_count = keep_count;
        self
    }

    /// Replaces the retention pruner.
    #[must_use]
    pub const fn with_pruner(mut self, pruner: RetentionPruner) -> Self {
        self.pruner = pruner;
        self
    }

    /// Returns the number of artifacts kept per VM.
    #[must_use]
    pub const fn keep_count(&self) -> usize {
        self.keep_count
    }

    /// Backs up `vm` into `destination`, naming the artifact after the
    /// current local time.
    pub async fn backup_vm<I: Inventory>(
        &self,
        inventory: &I,
        vm: &ManagedObject,
        destination: &BackupDestination,
    ) -> BackupReport {
        self.backup_vm_at(inventory, vm, destination, Local::now().naive_local())
            .await
    }

    /// Backs up `vm`, naming the artifact after `taken_at`.
    ///
    /// Failures never escape: each one is logged with the VM name and
    /// recorded in the returned report.
    pub async fn backup_vm_at<I: Inventory>(
        &self,
        inventory: &I,
        vm: &ManagedObject,
        destination: &BackupDestination,
        taken_at: NaiveDateTime,
    ) -> BackupReport {
        let snapshot = match self.take_snapshot(inventory, vm).await {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                warn!(vm = %vm.name, "error taking snapshot of virtual machine: {reason}");
                return BackupReport {
                    vm: vm.name.clone(),
                    status: BackupStatus::SnapshotFailed { reason },
                    snapshot_removed: false,
                };
            }
        };

        let artifact = artifact_name(&vm.name, taken_at);
        let spec = CloneSpec {
            name: artifact.clone(),
            snapshot: snapshot.clone(),
            folder: destination.folder.clone(),
            datastore: destination.datastore.clone(),
            template: true,
            memory: false,
        };
        let cloned = self.clone_vm(inventory, vm, &spec).await;

        match cloned {
            Ok(()) => {
                info!(vm = %vm.name, artifact = %artifact, "successful backup of VM, deleting snapshot");
                let snapshot_removed = self.remove_snapshot(inventory, vm, &snapshot).await;
                let retention = self
                    .pruner
                    .enforce(inventory, vm, self.keep_count, &destination.folder)
                    .await
                    .map_err(|err| {
                        warn!(vm = %vm.name, "failed to enforce retention: {err}");
                        err.to_string()
                    });
                BackupReport {
                    vm: vm.name.clone(),
                    status: BackupStatus::Completed {
                        artifact,
                        retention,
                    },
                    snapshot_removed,
                }
            }
            Err(reason) => {
                warn!(vm = %vm.name, "failed to clone VM, deleting snapshot: {reason}");
                let snapshot_removed = self.remove_snapshot(inventory, vm, &snapshot).await;
                BackupReport {
                    vm: vm.name.clone(),
                    status: BackupStatus::CloneFailed { artifact, reason },
                    snapshot_removed,
                }
            }
        }
    }

    async fn take_snapshot<I: Inventory>(
        &self,
        inventory: &I,
        vm: &ManagedObject,
    ) -> Result<SnapshotRef, String> {
        let request = SnapshotRequest::pre_backup();
        let task = inventory
            .create_snapshot(vm, &request)
            .await
            .map_err(|err| format!("snapshot request rejected: {err}"))?;
        sleep(self.snapshot_settle_delay).await;

        match self.tracker.wait(inventory, &task).await {
            TaskOutcome::Completed(TaskPayload::Snapshot(snapshot)) => Ok(snapshot),
            TaskOutcome::Completed(TaskPayload::Object(object)) => Err(format!(
                "snapshot task returned {} instead of a snapshot",
                object.name
            )),
            TaskOutcome::CompletedEmpty => {
                Err(String::from("snapshot task returned no snapshot reference"))
            }
            TaskOutcome::Failed(message) => Err(message),
            TaskOutcome::TimedOut => Err(String::from("snapshot task timed out")),
        }
    }

    async fn clone_vm<I: Inventory>(
        &self,
        inventory: &I,
        vm: &ManagedObject,
        spec: &CloneSpec,
    ) -> Result<(), String> {
        let task = inventory
            .clone_as_template(vm, spec)
            .await
            .map_err(|err| format!("clone request rejected: {err}"))?;

        match self.tracker.wait(inventory, &task).await {
            TaskOutcome::Completed(_) | TaskOutcome::CompletedEmpty => Ok(()),
            TaskOutcome::Failed(message) => Err(message),
            TaskOutcome::TimedOut => Err(String::from("clone task timed out")),
        }
    }

    async fn remove_snapshot<I: Inventory>(
        &self,
        inventory: &I,
        vm: &ManagedObject,
        snapshot: &SnapshotRef,
    ) -> bool {
        let task = match inventory.remove_snapshot(snapshot, false).await {
            Ok(task) => task,
            Err(err) => {
                warn!(vm = %vm.name, snapshot = %snapshot.name, "snapshot removal rejected: {err}");
                return false;
            }
        };

        let removed = self.tracker.wait(inventory, &task).await.is_success();
        if removed {
            debug!(vm = %vm.name, "snapshot removed");
        }
        removed
    }
}
