//! Drives one full backup pass over the discovered inventory.
//!
//! VMs are backed up one at a time in discovery order. A failed backup is
//! recorded and the pass moves on; only discovery failures abort the run.

use std::time::{Duration, Instant};

use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::backup::{BackupOrchestrator, BackupReport};
use crate::discovery::{DiscoveryError, ExclusionSets, collect_vms};
use crate::inventory::{Inventory, ManagedObject};
use crate::targets::BackupTargets;

/// Outcome of one backup pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// One report per VM that was attempted, in order.
    pub reports: Vec<BackupReport>,
    /// Discovered VMs skipped because they are excluded by name.
    pub skipped: Vec<String>,
    /// Wall-clock duration of the pass.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Number of VMs for which an artifact was produced.
    #[must_use]
    pub fn backed_up(&self) -> usize {
        self.reports.iter().filter(|report| report.succeeded()).count()
    }

    /// Number of attempted VMs whose backup failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.reports.len() - self.backed_up()
    }

    /// Names of the VMs whose backup failed.
    #[must_use]
    pub fn failed_vms(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|report| !report.succeeded())
            .map(|report| report.vm.as_str())
            .collect()
    }
}

/// Runs the backup orchestrator over every eligible VM.
#[derive(Clone, Debug)]
pub struct RunDriver {
    orchestrator: BackupOrchestrator,
    exclusions: ExclusionSets,
}

impl RunDriver {
    /// Creates a driver.
    #[must_use]
    pub const fn new(orchestrator: BackupOrchestrator, exclusions: ExclusionSets) -> Self {
        Self {
            orchestrator,
            exclusions,
        }
    }

    /// Returns the VMs a pass would back up, without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when walking the inventory fails.
    pub async fn plan<I: Inventory>(
        &self,
        inventory: &I,
        targets: &BackupTargets,
    ) -> Result<Vec<ManagedObject>, DiscoveryError<I::Error>> {
        let discovered = collect_vms(inventory, targets.vm_root(), self.exclusions.folders()).await?;
        Ok(discovered
            .into_iter()
            .filter(|vm| !self.exclusions.excludes_vm(&vm.name))
            .collect())
    }

    /// Performs one full pass and summarises it.
    ///
    /// Every log line of the pass carries a fresh `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when walking the inventory fails. Per-VM
    /// failures are part of the summary instead.
    pub async fn execute<I: Inventory>(
        &self,
        inventory: &I,
        targets: &BackupTargets,
    ) -> Result<RunSummary, DiscoveryError<I::Error>> {
        let span = info_span!("backup_run", run_id = %Uuid::new_v4());
        self.execute_pass(inventory, targets).instrument(span).await
    }

    async fn execute_pass<I: Inventory>(
        &self,
        inventory: &I,
        targets: &BackupTargets,
    ) -> Result<RunSummary, DiscoveryError<I::Error>> {
        let started = Instant::now();
        info!("==================== new backup run ====================");

        let discovered = collect_vms(inventory, targets.vm_root(), self.exclusions.folders())
            .await
            .inspect_err(|err| error!("virtual machine discovery failed: {err}"))?;
        info!(count = discovered.len(), "discovered virtual machines");

        let mut summary = RunSummary::default();
        for vm in &discovered {
            if self.exclusions.excludes_vm(&vm.name) {
                info!(vm = %vm.name, "skipping excluded virtual machine");
                summary.skipped.push(vm.name.clone());
                continue;
            }

            info!(vm = %vm.name, "backing up virtual machine");
            let report = self
                .orchestrator
                .backup_vm(inventory, vm, &targets.destination)
                .await;
            info!(vm = %vm.name, "{}", report.status);
            summary.reports.push(report);
        }

        summary.elapsed = started.elapsed();
        info!(
            backed_up = summary.backed_up(),
            failed = summary.failed(),
            skipped = summary.skipped.len(),
            elapsed_secs = summary.elapsed.as_secs(),
            "backup run finished"
        );
        Ok(summary)
    }
}
