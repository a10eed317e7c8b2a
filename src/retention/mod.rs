//! Retention of backup artifacts.
//!
//! The pruner keeps the newest `keep_count` artifacts of a VM in the backup
//! folder and destroys older ones, oldest first. The live artifact list is
//! re-read before every deletion, so artifacts created concurrently by
//! someone else are counted too.

use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::{ArtifactMatch, ArtifactNameError, parse_artifact_timestamp};
use crate::inventory::{Inventory, ManagedObject};
use crate::task::TaskTracker;

/// Number of artifacts kept per VM when nothing else is configured.
pub const DEFAULT_KEEP_COUNT: usize = 2;

/// Result of a pruning pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PruneSummary {
    /// Names of the artifacts destroyed, in deletion order.
    pub destroyed: Vec<String>,
    /// Artifact whose deletion failed and stopped the pass, if any.
    pub stopped_at: Option<String>,
}

impl PruneSummary {
    /// Returns `true` when the pass ended because a deletion failed.
    #[must_use]
    pub const fn stopped_early(&self) -> bool {
        self.stopped_at.is_some()
    }
}

/// Errors that abort a pruning pass.
#[derive(Debug, Error)]
pub enum RetentionError<E>
where
    E: std::error::Error + 'static,
{
    /// Listing the backup folder failed.
    #[error("failed to list backup folder {folder}: {source}")]
    List {
        /// Backup folder name.
        folder: String,
        /// Inventory error.
        #[source]
        source: E,
    },
    /// A matching artifact name carries no parseable timestamp.
    #[error(transparent)]
    ArtifactName(#[from] ArtifactNameError),
}

/// Destroys a VM's oldest backup artifacts beyond a keep-count.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetentionPruner {
    tracker: TaskTracker,
    matching: ArtifactMatch,
}

impl RetentionPruner {
    /// Creates a pruner that tracks deletions with `tracker`.
    #[must_use]
    pub const fn new(tracker: TaskTracker) -> Self {
        Self {
            tracker,
            matching: ArtifactMatch::Substring,
        }
    }

    /// Overrides how artifacts are attributed to a VM.
    #[must_use]
    pub const fn with_matching(mut self, matching: ArtifactMatch) -> Self {
        self.matching = matching;
        self
    }

    /// Returns the artifact matching mode.
    #[must_use]
    pub const fn matching(&self) -> ArtifactMatch {
        self.matching
    }

    /// Destroys the oldest artifacts of `vm` in `container` until at most
    /// `keep_count` remain.
    ///
    /// A failed deletion is logged and ends the pass without retrying; the
    /// returned summary records where it stopped.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::List`] when the container cannot be listed
    /// and [`RetentionError::ArtifactName`] when a matching artifact name
    /// carries no parseable timestamp.
    pub async fn enforce<I: Inventory>(
        &self,
        inventory: &I,
        vm: &ManagedObject,
        keep_count: usize,
        container: &ManagedObject,
    ) -> Result<PruneSummary, RetentionError<I::Error>> {
        let mut summary = PruneSummary::default();

        loop {
            let artifacts = self.find_artifacts(inventory, vm, container).await?;
            if artifacts.len() <= keep_count {
                return Ok(summary);
            }

            let Some(oldest) = oldest_artifact(&vm.name, artifacts)? else {
                return Ok(summary);
            };

            let task = match inventory.destroy(&oldest).await {
                Ok(task) => task,
                Err(err) => {
                    warn!(vm = %vm.name, artifact = %oldest.name, "failed to delete old backup: {err}");
                    summary.stopped_at = Some(oldest.name);
                    return Ok(summary);
                }
            };

            if self.tracker.wait(inventory, &task).await.is_success() {
                info!(vm = %vm.name, artifact = %oldest.name, "deleted old backup");
                summary.destroyed.push(oldest.name);
            } else {
                warn!(vm = %vm.name, artifact = %oldest.name, "failed to delete old backup");
                summary.stopped_at = Some(oldest.name);
                return Ok(summary);
            }
        }
    }

    async fn find_artifacts<I: Inventory>(
        &self,
        inventory: &I,
        vm: &ManagedObject,
        container: &ManagedObject,
    ) -> Result<Vec<ManagedObject>, RetentionError<I::Error>> {
        let children = inventory
            .list_children(container)
            .await
            .map_err(|source| RetentionError::List {
                folder: container.name.clone(),
                source,
            })?;
        Ok(children
            .into_iter()
            .filter(|child| self.matching.matches(&vm.name, &child.name))
            .collect())
    }
}

/// Picks the artifact with the earliest embedded timestamp.
fn oldest_artifact(
    vm_name: &str,
    artifacts: Vec<ManagedObject>,
) -> Result<Option<ManagedObject>, ArtifactNameError> {
    let mut dated = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let taken_at = parse_artifact_timestamp(vm_name, &artifact.name)?;
        dated.push((taken_at, artifact));
    }
    Ok(dated
        .into_iter()
        .min_by(|(left, _), (right, _)| left.cmp(right))
        .map(|(_, artifact)| artifact))
}
