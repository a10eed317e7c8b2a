//! Shared fixtures and helpers for backup BDD scenarios.

use std::collections::BTreeMap;

use rstest::fixture;
use vsphere_backup::discovery::parse_name_list;
use vsphere_backup::retention::DEFAULT_KEEP_COUNT;
use vsphere_backup::test_support::FakeInventory;
use vsphere_backup::{Datacenter, ManagedObject, RunSummary};

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    Pruned,
    SetupFailed(String),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct BackupContext {
    pub inventory: FakeInventory,
    pub datacenter: Option<Datacenter>,
    pub target_datacenter: String,
    pub backup_folder: String,
    pub backup_datastore: String,
    pub folders: BTreeMap<String, ManagedObject>,
    pub vms: BTreeMap<String, ManagedObject>,
    pub excluded_folders: Vec<String>,
    pub excluded_vms: Vec<String>,
    pub keep_count: usize,
    pub outcome: Option<RunOutcome>,
}

#[fixture]
pub fn backup_context() -> BackupContext {
    BackupContext {
        inventory: FakeInventory::new(),
        datacenter: None,
        target_datacenter: String::new(),
        backup_folder: String::new(),
        backup_datastore: String::new(),
        folders: BTreeMap::new(),
        vms: BTreeMap::new(),
        excluded_folders: Vec::new(),
        excluded_vms: Vec::new(),
        keep_count: DEFAULT_KEEP_COUNT,
        outcome: None,
    }
}

impl BackupContext {
    pub fn vm_root(&self) -> ManagedObject {
        self.datacenter
            .as_ref()
            .map(|datacenter| datacenter.vm_folder.clone())
            .unwrap_or_else(|| panic!("test setup requires a datacenter"))
    }

    pub fn folder(&mut self, name: &str) -> ManagedObject {
        if let Some(folder) = self.folders.get(name) {
            return folder.clone();
        }
        let folder = self.inventory.add_folder(&self.vm_root(), name);
        self.folders.insert(name.to_owned(), folder.clone());
        folder
    }

    pub fn backups(&self) -> ManagedObject {
        self.folders
            .get(&self.backup_folder)
            .cloned()
            .unwrap_or_else(|| panic!("test setup requires a backup folder"))
    }

    pub fn artifacts_of(&self, vm: &str) -> Vec<String> {
        let prefix = format!("{vm}_Backup_");
        self.inventory
            .child_names(&self.backups())
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect()
    }
}

pub fn names(raw: &str) -> Vec<String> {
    parse_name_list(raw)
}
