//! Command-line interface definitions for the `vsphere-backup` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `vsphere-backup` binary.
///
/// Settings come from `vsphere-backup.toml` and `VSPHERE_BACKUP_*`
/// environment variables rather than flags.
#[derive(Debug, Parser)]
#[command(
    name = "vsphere-backup",
    about = "Back up vSphere virtual machines as templates and prune old backups",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run one full backup pass.
    #[command(
        name = "run",
        about = "Back up every eligible VM and prune old backups"
    )]
    Run,
    /// List the VMs a pass would back up, without changing anything.
    #[command(
        name = "discover",
        about = "List the VMs a backup pass would process"
    )]
    Discover,
}
