//! Backup artifact naming.
//!
//! A backup artifact is a template named `<vm>_Backup_<YYYY-MM-DD_HH-MM>`.
//! The name is the only record of when the backup was taken, so parsing it
//! back is how retention orders artifacts.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the VM name and the timestamp.
pub const ARTIFACT_SEPARATOR: &str = "_Backup_";

/// `chrono` format of the timestamp suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// Builds the artifact name for a backup of `vm_name` taken at `taken_at`.
#[must_use]
pub fn artifact_name(vm_name: &str, taken_at: NaiveDateTime) -> String {
    format!(
        "{vm_name}{ARTIFACT_SEPARATOR}{}",
        taken_at.format(TIMESTAMP_FORMAT)
    )
}

/// Errors raised when an artifact name does not follow the naming scheme.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArtifactNameError {
    /// The name does not start with `<vm>_Backup_`.
    #[error("artifact {artifact} does not belong to VM {vm}")]
    ForeignPrefix {
        /// Artifact name.
        artifact: String,
        /// VM name the artifact was expected to belong to.
        vm: String,
    },
    /// The suffix is not a `YYYY-MM-DD_HH-MM` timestamp.
    #[error("artifact {artifact} has a malformed timestamp: {message}")]
    MalformedTimestamp {
        /// Artifact name.
        artifact: String,
        /// Parser error message.
        message: String,
    },
}

/// Parses the creation time embedded in an artifact name of `vm_name`.
///
/// # Errors
///
/// Returns [`ArtifactNameError`] when the name lacks the VM prefix or the
/// timestamp suffix does not parse.
pub fn parse_artifact_timestamp(
    vm_name: &str,
    artifact: &str,
) -> Result<NaiveDateTime, ArtifactNameError> {
    let suffix = artifact
        .strip_prefix(vm_name)
        .and_then(|rest| rest.strip_prefix(ARTIFACT_SEPARATOR))
        .ok_or_else(|| ArtifactNameError::ForeignPrefix {
            artifact: artifact.to_owned(),
            vm: vm_name.to_owned(),
        })?;

    NaiveDateTime::parse_from_str(suffix, TIMESTAMP_FORMAT).map_err(|err| {
        ArtifactNameError::MalformedTimestamp {
            artifact: artifact.to_owned(),
            message: err.to_string(),
        }
    })
}

/// How retention decides that an artifact belongs to a VM.
///
/// Configuration spells the modes in lower case (`substring`, `prefix`).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactMatch {
    /// The VM name appears anywhere in the artifact name. A VM named `web`
    /// also matches artifacts of `web01`, whose names then fail to parse.
    #[default]
    Substring,
    /// The artifact name starts with `<vm>_Backup_`.
    Prefix,
}

impl ArtifactMatch {
    /// Returns `true` when `artifact` is considered a backup of `vm_name`.
    #[must_use]
    pub fn matches(self, vm_name: &str, artifact: &str) -> bool {
        match self {
            Self::Substring => artifact.contains(vm_name),
            Self::Prefix => artifact
                .strip_prefix(vm_name)
                .is_some_and(|rest| rest.starts_with(ARTIFACT_SEPARATOR)),
        }
    }
}

impl FromStr for ArtifactMatch {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "substring" => Ok(Self::Substring),
            "prefix" => Ok(Self::Prefix),
            other => Err(format!(
                "unknown artifact match mode '{other}' (expected 'substring' or 'prefix')"
            )),
        }
    }
}

impl fmt::Display for ArtifactMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Substring => f.write_str("substring"),
            Self::Prefix => f.write_str("prefix"),
        }
    }
}
