//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::artifact::ArtifactMatch;
use crate::backup::BackupOrchestrator;
use crate::discovery::ExclusionSets;
use crate::govc::GovcConfig;
use crate::retention::RetentionPruner;
use crate::task::TaskTracker;
use crate::telemetry::{LoggingOptions, parse_level};

/// Backup settings derived from environment variables, configuration files,
/// and defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VSPHERE_BACKUP",
    discovery(
        app_name = "vsphere-backup",
        env_var = "VSPHERE_BACKUP_CONFIG_PATH",
        config_file_name = "vsphere-backup.toml",
        dotfile_name = ".vsphere-backup.toml",
        project_file_name = "vsphere-backup.toml"
    )
)]
pub struct BackupConfig {
    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`).
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
    /// File receiving log lines. Logs go to stderr when unset.
    pub log_file: Option<String>,
    /// vCenter or ESXi endpoint, as a host name or URL.
    pub host: String,
    /// Login used for the management session.
    pub username: String,
    /// Password used for the management session.
    pub password: String,
    /// Skips TLS certificate verification when set.
    #[ortho_config(default = false)]
    pub insecure: bool,
    /// Path to the `govc` executable.
    #[ortho_config(default = "govc".to_owned())]
    pub govc_bin: String,
    /// Datacenter holding the VMs to back up.
    pub datacenter: String,
    /// Folder under the datacenter's VM root receiving backup templates.
    #[ortho_config(default = "Backups".to_owned())]
    pub backup_folder: String,
    /// Datastore receiving the templates' disks.
    pub backup_datastore: String,
    /// Comma-separated folder names whose subtrees are skipped.
    #[ortho_config(default = String::new())]
    pub exclude_folders: String,
    /// Comma-separated VM names that are never backed up.
    #[ortho_config(default = String::new())]
    pub exclude_vms: String,
    /// Number of artifacts kept per VM.
    #[ortho_config(default = 2)]
    pub keep_count: usize,
    /// Seconds between two polls of a running task.
    #[ortho_config(default = 3)]
    pub poll_interval_secs: u64,
    /// Seconds to wait after submitting a snapshot before tracking it.
    #[ortho_config(default = 15)]
    pub snapshot_settle_secs: u64,
    /// Upper bound for a single task, in seconds. Unbounded when unset.
    pub task_timeout_secs: Option<u64>,
    /// How artifacts are attributed to a VM: `substring` or `prefix`.
    #[ortho_config(default = ArtifactMatch::Substring)]
    pub artifact_match: ArtifactMatch,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 7] = [
    FieldMetadata::new("vCenter host", "VSPHERE_BACKUP_HOST", "host"),
    FieldMetadata::new("vCenter username", "VSPHERE_BACKUP_USERNAME", "username"),
    FieldMetadata::new("vCenter password", "VSPHERE_BACKUP_PASSWORD", "password"),
    FieldMetadata::new("datacenter name", "VSPHERE_BACKUP_DATACENTER", "datacenter"),
    FieldMetadata::new(
        "backup folder name",
        "VSPHERE_BACKUP_BACKUP_FOLDER",
        "backup_folder",
    ),
    FieldMetadata::new(
        "backup datastore name",
        "VSPHERE_BACKUP_BACKUP_DATASTORE",
        "backup_datastore",
    ),
    FieldMetadata::new("govc executable", "VSPHERE_BACKUP_GOVC_BIN", "govc_bin"),
];

impl BackupConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to vsphere-backup.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    const fn required_values(&self) -> [&String; 7] {
        [
            &self.host,
            &self.username,
            &self.password,
            &self.datacenter,
            &self.backup_folder,
            &self.backup_datastore,
            &self.govc_bin,
        ]
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("vsphere-backup")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or configuration
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, metadata) in self.required_values().into_iter().zip(&REQUIRED_FIELDS) {
            Self::require_field(value, metadata)?;
        }
        parse_level(&self.log_level)
            .map_err(|err| ConfigError::Invalid(format!("{err} (VSPHERE_BACKUP_LOG_LEVEL)")))?;
        if self.keep_count == 0 {
            return Err(ConfigError::Invalid(String::from(
                "keep_count must be at least 1 (VSPHERE_BACKUP_KEEP_COUNT)",
            )));
        }
        if self
            .log_file
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return Err(ConfigError::Invalid(String::from(
                "log_file must not be empty (VSPHERE_BACKUP_LOG_FILE)",
            )));
        }
        Ok(())
    }

    /// Builds the task tracker from the polling settings.
    #[must_use]
    pub fn task_tracker(&self) -> TaskTracker {
        TaskTracker::new()
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_deadline(self.task_timeout_secs.map(Duration::from_secs))
    }

    /// Builds the per-VM orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> BackupOrchestrator {
        let tracker = self.task_tracker();
        let pruner = RetentionPruner::new(tracker).with_matching(self.artifact_match);
        BackupOrchestrator::new(tracker)
            .with_pruner(pruner)
            .with_keep_count(self.keep_count)
            .with_snapshot_settle_delay(Duration::from_secs(self.snapshot_settle_secs))
    }

    /// Builds the folder and VM exclusion sets.
    #[must_use]
    pub fn exclusions(&self) -> ExclusionSets {
        ExclusionSets::from_lists(&self.exclude_folders, &self.exclude_vms)
    }

    /// Builds the `govc` transport settings.
    #[must_use]
    pub fn govc(&self) -> GovcConfig {
        GovcConfig {
            binary: self.govc_bin.clone(),
            url: self.host.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            insecure: self.insecure,
        }
    }

    /// Builds the logging settings.
    #[must_use]
    pub fn logging(&self) -> LoggingOptions {
        LoggingOptions {
            level: self.log_level.clone(),
            file: self.log_file.as_deref().map(Into::into),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
