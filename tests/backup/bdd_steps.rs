//! BDD step definitions for backup runs.

use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use vsphere_backup::test_support::FakeOperation;
use vsphere_backup::{
    BACKUP_SNAPSHOT_NAME, BackupOrchestrator, ExclusionSets, RetentionPruner, RunDriver,
    SetupError, TaskTracker, resolve_targets,
};

use super::test_helpers::{BackupContext, RunOutcome, names};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn tracker() -> TaskTracker {
    TaskTracker::new().with_poll_interval(Duration::ZERO)
}

#[given("a datacenter \"{name}\" with backup folder \"{folder}\" and datastore \"{datastore}\"")]
fn datacenter_with_targets(
    mut backup_context: BackupContext,
    name: String,
    folder: String,
    datastore: String,
) -> BackupContext {
    let datacenter = backup_context.inventory.add_datacenter(&name);
    backup_context
        .inventory
        .add_datastore(&datacenter.datastore_folder, &datastore);
    backup_context.inventory.set_task_latency(1);
    backup_context.datacenter = Some(datacenter);
    backup_context.target_datacenter = name;
    backup_context.backup_folder.clone_from(&folder);
    backup_context.backup_datastore = datastore;
    backup_context.folder(&folder);
    backup_context
}

#[given("virtual machines \"{vms}\" in folder \"{folder}\"")]
fn vms_in_folder(mut backup_context: BackupContext, vms: String, folder: String) -> BackupContext {
    let parent = backup_context.folder(&folder);
    for name in names(&vms) {
        let vm = backup_context.inventory.add_vm(&parent, &name);
        backup_context.vms.insert(name, vm);
    }
    backup_context
}

#[given("a template \"{name}\" in folder \"{folder}\"")]
fn template_in_folder(
    mut backup_context: BackupContext,
    name: String,
    folder: String,
) -> BackupContext {
    let parent = backup_context.folder(&folder);
    backup_context.inventory.add_template(&parent, &name);
    backup_context
}

#[given("existing backups \"{artifacts}\"")]
fn existing_backups(backup_context: BackupContext, artifacts: String) -> BackupContext {
    let backups = backup_context.backups();
    for artifact in names(&artifacts) {
        backup_context.inventory.add_template(&backups, &artifact);
    }
    backup_context
}

#[given("cloning \"{vm}\" fails")]
fn cloning_fails(backup_context: BackupContext, vm: String) -> BackupContext {
    backup_context.inventory.fail(FakeOperation::Clone, &vm);
    backup_context
}

#[given("taking a snapshot of \"{vm}\" fails")]
fn snapshot_fails(backup_context: BackupContext, vm: String) -> BackupContext {
    backup_context.inventory.fail(FakeOperation::Snapshot, &vm);
    backup_context
}

#[given("folders \"{folders}\" are excluded")]
fn folders_excluded(mut backup_context: BackupContext, folders: String) -> BackupContext {
    backup_context.excluded_folders.extend(names(&folders));
    backup_context
}

#[given("virtual machines \"{vms}\" are excluded")]
fn vms_excluded(mut backup_context: BackupContext, vms: String) -> BackupContext {
    backup_context.excluded_vms.extend(names(&vms));
    backup_context
}

#[given("a keep count of {keep_count:u32}")]
fn keep_count(mut backup_context: BackupContext, keep_count: u32) -> BackupContext {
    backup_context.keep_count = keep_count as usize;
    backup_context
}

#[given("the run targets datacenter \"{name}\"")]
fn targets_datacenter(mut backup_context: BackupContext, name: String) -> BackupContext {
    backup_context.target_datacenter = name;
    backup_context
}

#[when("I run a backup pass")]
fn run_pass(mut backup_context: BackupContext) -> Result<BackupContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = BackupOrchestrator::new(tracker())
        .with_snapshot_settle_delay(Duration::ZERO)
        .with_keep_count(backup_context.keep_count);
    let driver = RunDriver::new(
        orchestrator,
        ExclusionSets::new(
            backup_context.excluded_folders.clone(),
            backup_context.excluded_vms.clone(),
        ),
    );

    let context = &backup_context;
    let outcome = runtime.block_on(async {
        let targets = match resolve_targets(
            &context.inventory,
            &context.target_datacenter,
            &context.backup_folder,
            &context.backup_datastore,
        )
        .await
        {
            Ok(targets) => targets,
            Err(err @ SetupError::Inventory(_)) => return RunOutcome::Failed(err.to_string()),
            Err(err) => return RunOutcome::SetupFailed(err.to_string()),
        };
        match driver.execute(&context.inventory, &targets).await {
            Ok(summary) => RunOutcome::Completed(summary),
            Err(err) => RunOutcome::Failed(err.to_string()),
        }
    });

    backup_context.outcome = Some(outcome);
    Ok(backup_context)
}

#[when("I prune the backups of \"{vm}\" keeping {keep_count:u32}")]
fn prune_backups(
    mut backup_context: BackupContext,
    vm: String,
    keep_count: u32,
) -> Result<BackupContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let target = backup_context
        .vms
        .get(&vm)
        .cloned()
        .ok_or_else(|| StepError::Assertion(format!("unknown virtual machine {vm}")))?;
    let backups = backup_context.backups();

    let result = runtime.block_on(RetentionPruner::new(tracker()).enforce(
        &backup_context.inventory,
        &target,
        keep_count as usize,
        &backups,
    ));

    backup_context.outcome = Some(match result {
        Ok(_) => RunOutcome::Pruned,
        Err(err) => RunOutcome::Failed(err.to_string()),
    });
    Ok(backup_context)
}

fn completed(backup_context: &BackupContext) -> Result<&vsphere_backup::RunSummary, StepError> {
    match backup_context.outcome.as_ref() {
        Some(RunOutcome::Completed(summary)) => Ok(summary),
        Some(RunOutcome::Failed(message)) => Err(StepError::Assertion(format!(
            "expected a completed run, got failure: {message}"
        ))),
        other => Err(StepError::Assertion(format!(
            "expected a completed run, got {other:?}"
        ))),
    }
}

#[then("the run completes")]
fn run_completes(backup_context: &BackupContext) -> Result<(), StepError> {
    completed(backup_context).map(|_| ())
}

#[then("artifacts exist for \"{vms}\"")]
fn artifacts_exist(backup_context: &BackupContext, vms: String) -> Result<(), StepError> {
    for vm in names(&vms) {
        if backup_context.artifacts_of(&vm).len() != 1 {
            return Err(StepError::Assertion(format!(
                "expected one artifact for {vm}, found {:?}",
                backup_context.artifacts_of(&vm)
            )));
        }
    }
    Ok(())
}

#[then("no artifact exists for \"{vm}\"")]
fn no_artifact(backup_context: &BackupContext, vm: String) -> Result<(), StepError> {
    let artifacts = backup_context.artifacts_of(&vm);
    if artifacts.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no artifact for {vm}, found {artifacts:?}"
        )))
    }
}

#[then("no virtual machine keeps a pre-backup snapshot")]
fn no_snapshot_left(backup_context: &BackupContext) -> Result<(), StepError> {
    for (name, vm) in &backup_context.vms {
        let snapshots = backup_context.inventory.snapshots(vm);
        if snapshots.iter().any(|snapshot| snapshot == BACKUP_SNAPSHOT_NAME) {
            return Err(StepError::Assertion(format!(
                "{name} still has a pre-backup snapshot"
            )));
        }
    }
    Ok(())
}

#[then("the run reports {backed_up:u32} backed up and {failed:u32} failed")]
fn reports_counts(
    backup_context: &BackupContext,
    backed_up: u32,
    failed: u32,
) -> Result<(), StepError> {
    let summary = completed(backup_context)?;
    if summary.backed_up() == backed_up as usize && summary.failed() == failed as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {backed_up} backed up and {failed} failed, got {summary:?}"
        )))
    }
}

#[then("the run reports {skipped:u32} skipped virtual machine")]
fn reports_skipped(backup_context: &BackupContext, skipped: u32) -> Result<(), StepError> {
    let summary = completed(backup_context)?;
    if summary.skipped.len() == skipped as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {skipped} skipped, got {:?}",
            summary.skipped
        )))
    }
}

#[then("no clone was requested for \"{vm}\"")]
fn no_clone_requested(backup_context: &BackupContext, vm: String) -> Result<(), StepError> {
    let clones = backup_context.inventory.targets_of(FakeOperation::Clone);
    if clones.contains(&vm) {
        Err(StepError::Assertion(format!(
            "unexpected clone of {vm}: {clones:?}"
        )))
    } else {
        Ok(())
    }
}

#[then("snapshots were requested for \"{vms}\"")]
fn snapshots_requested(backup_context: &BackupContext, vms: String) -> Result<(), StepError> {
    let requested = backup_context.inventory.targets_of(FakeOperation::Snapshot);
    let expected = names(&vms);
    if requested == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected snapshots for {expected:?}, got {requested:?}"
        )))
    }
}

#[then("no snapshot was requested")]
fn no_snapshot_requested(backup_context: &BackupContext) -> Result<(), StepError> {
    let requested = backup_context.inventory.targets_of(FakeOperation::Snapshot);
    if requested.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected snapshots: {requested:?}"
        )))
    }
}

#[then("the backup folder holds {count:u32} artifacts for \"{vm}\"")]
fn folder_holds(backup_context: &BackupContext, count: u32, vm: String) -> Result<(), StepError> {
    let artifacts = backup_context.artifacts_of(&vm);
    if artifacts.len() == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} artifacts for {vm}, found {artifacts:?}"
        )))
    }
}

#[then("backup \"{artifact}\" was destroyed")]
fn backup_destroyed(backup_context: &BackupContext, artifact: String) -> Result<(), StepError> {
    let destroyed = backup_context.inventory.targets_of(FakeOperation::Destroy);
    let present = backup_context
        .inventory
        .child_names(&backup_context.backups())
        .contains(&artifact);
    if destroyed.contains(&artifact) && !present {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {artifact} to be destroyed, destroyed: {destroyed:?}"
        )))
    }
}

#[then("backup \"{artifact}\" was kept")]
fn backup_kept(backup_context: &BackupContext, artifact: String) -> Result<(), StepError> {
    let present = backup_context
        .inventory
        .child_names(&backup_context.backups())
        .contains(&artifact);
    if present {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected {artifact} to be kept")))
    }
}

#[then("the run fails during setup with \"{message}\"")]
fn setup_failure(backup_context: &BackupContext, message: String) -> Result<(), StepError> {
    match backup_context.outcome.as_ref() {
        Some(RunOutcome::SetupFailed(actual)) if actual.contains(&message) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected setup failure containing {message:?}, got {other:?}"
        ))),
    }
}
