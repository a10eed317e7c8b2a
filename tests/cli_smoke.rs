//! Behavioural smoke tests for the `vsphere-backup` entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use predicates::str::contains;
use tempfile::TempDir;

struct Sandbox {
    root: Utf8PathBuf,
    _tmp: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-UTF-8 tempdir: {}", path.display()));
        Self { root, _tmp: tmp }
    }

    fn with_config(govc_bin: &str) -> Self {
        Self::with_extra_config(govc_bin, |_| String::new())
    }

    fn with_extra_config(govc_bin: &str, extra: impl FnOnce(&Utf8PathBuf) -> String) -> Self {
        let sandbox = Self::new();
        let contents = format!(
            concat!(
                "host = \"vcenter.example.com\"\n",
                "username = \"backup@vsphere.local\"\n",
                "password = \"s3cret\"\n",
                "datacenter = \"dc1\"\n",
                "backup_datastore = \"backup-ds\"\n",
                "govc_bin = \"{}\"\n",
                "{}",
            ),
            govc_bin,
            extra(&sandbox.root)
        );
        Dir::open_ambient_dir(&sandbox.root, ambient_authority())
            .unwrap_or_else(|err| panic!("open tempdir: {err}"))
            .write("vsphere-backup.toml", contents)
            .unwrap_or_else(|err| panic!("write config: {err}"));
        sandbox
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = cargo_bin_cmd!("vsphere-backup");
        cmd.arg(subcommand)
            .current_dir(&self.root)
            .env("HOME", &self.root)
            .env("XDG_CONFIG_HOME", &self.root)
            .env(
                "VSPHERE_BACKUP_CONFIG_PATH",
                self.root.join("vsphere-backup.toml"),
            )
            .env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("vsphere-backup");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn cli_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("vsphere-backup");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("run"))
        .stdout(contains("discover"));
}

#[test]
fn run_without_configuration_exits_with_error() {
    let sandbox = Sandbox::new();
    sandbox
        .command("run")
        .assert()
        .code(1)
        .stderr(contains("configuration"));
}

#[test]
fn run_reports_unreachable_endpoint() {
    let sandbox = Sandbox::with_config("false");
    sandbox
        .command("run")
        .assert()
        .code(1)
        .stderr(contains("failed to connect to vcenter.example.com"));
}

#[test]
fn discover_reports_missing_datacenter() {
    let sandbox = Sandbox::with_config("true");
    sandbox
        .command("discover")
        .assert()
        .code(1)
        .stdout("")
        .stderr(contains("datacenter dc1 not found"));
}

#[test]
fn setup_failures_reach_the_log_file() {
    let sandbox = Sandbox::with_extra_config("true", |root| {
        format!("log_file = \"{}\"\n", root.join("backup.log"))
    });
    sandbox
        .command("run")
        .assert()
        .code(1)
        .stderr(contains("datacenter dc1 not found"));

    let log = std::fs::read_to_string(sandbox.root.join("backup.log"))
        .unwrap_or_else(|err| panic!("read log file: {err}"));
    assert!(log.contains("ERROR"), "{log}");
    assert!(log.contains("datacenter dc1 not found"), "{log}");
}
