//! BDD scenarios for backup runs and retention.

use rstest_bdd_macros::scenario;

use super::test_helpers::{BackupContext, backup_context};

#[scenario(
    path = "tests/features/backup.feature",
    name = "A failed clone does not stop the run"
)]
fn scenario_failed_clone_continues(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A failed snapshot skips the clone"
)]
fn scenario_failed_snapshot_skips_clone(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "Excluded folders and virtual machines are left alone"
)]
fn scenario_exclusions(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "Templates are never backed up"
)]
fn scenario_templates_skipped(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A successful backup prunes older artifacts"
)]
fn scenario_backup_prunes(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "Pruning keeps the two newest artifacts"
)]
fn scenario_pruning_keeps_newest(backup_context: BackupContext) {
    let _ = backup_context;
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A missing datacenter is a setup failure"
)]
fn scenario_missing_datacenter(backup_context: BackupContext) {
    let _ = backup_context;
}
