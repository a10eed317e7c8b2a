//! Binary entry point for the `vsphere-backup` CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info, warn};

use cli::Cli;
use vsphere_backup::{
    BackupConfig, BackupTargets, ConfigError, DiscoveryError, GovcError, GovcInventory, RunDriver,
    SetupError, TelemetryError, init_logging, resolve_targets,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(#[from] TelemetryError),
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: GovcError,
    },
    #[error("setup failed: {0}")]
    Setup(#[from] SetupError<GovcError>),
    #[error("virtual machine discovery failed: {0}")]
    Discovery(#[from] DiscoveryError<GovcError>),
}

struct Session {
    config: BackupConfig,
    inventory: GovcInventory,
    targets: BackupTargets,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Run => run_backup().await,
        Cli::Discover => discover().await,
    }
}

async fn connect() -> Result<Session, CliError> {
    let config = BackupConfig::load_without_cli_args()?;
    config.validate()?;
    init_logging(&config.logging())?;

    let inventory = GovcInventory::new(config.govc());
    let about = inventory
        .about()
        .await
        .map_err(|source| CliError::Connect {
            host: config.host.clone(),
            source,
        })?;
    info!(host = %config.host, "connected: {}", about.lines().next().unwrap_or_default());

    let targets = resolve_targets(
        &inventory,
        &config.datacenter,
        &config.backup_folder,
        &config.backup_datastore,
    )
    .await?;

    Ok(Session {
        config,
        inventory,
        targets,
    })
}

fn driver(config: &BackupConfig) -> RunDriver {
    RunDriver::new(config.orchestrator(), config.exclusions())
}

async fn run_backup() -> Result<(), CliError> {
    let session = connect().await?;
    let summary = driver(&session.config)
        .execute(&session.inventory, &session.targets)
        .await?;

    let failed = summary.failed_vms();
    if !failed.is_empty() {
        warn!("backups failed for: {}", failed.join(", "));
    }
    Ok(())
}

async fn discover() -> Result<(), CliError> {
    let session = connect().await?;
    let vms = driver(&session.config)
        .plan(&session.inventory, &session.targets)
        .await?;

    let mut stdout = io::stdout().lock();
    for vm in vms {
        writeln!(stdout, "{}", vm.name).ok();
    }
    Ok(())
}

fn report_error(err: &CliError) {
    if is_logged(err) {
        error!("{err}");
    }
    write_error(io::stderr(), err);
}

/// Failures raised once logging is installed also go to the log.
const fn is_logged(err: &CliError) -> bool {
    matches!(
        err,
        CliError::Connect { .. } | CliError::Setup(_) | CliError::Discovery(_)
    )
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("run")]
    #[case("discover")]
    fn subcommands_parse(#[case] subcommand: &str) {
        let cli = Cli::try_parse_from(["vsphere-backup", subcommand])
            .unwrap_or_else(|err| panic!("{subcommand} should parse: {err}"));

        match (subcommand, cli) {
            ("run", Cli::Run) | ("discover", Cli::Discover) => {}
            (name, parsed) => panic!("{name} parsed as {parsed:?}"),
        }
    }

    #[test]
    fn unknown_subcommands_are_rejected() {
        assert!(Cli::try_parse_from(["vsphere-backup", "restore"]).is_err());
    }

    #[test]
    fn failures_after_logging_setup_are_logged() {
        let setup = CliError::Setup(SetupError::DatacenterNotFound(String::from("dc9")));
        let connect = CliError::Connect {
            host: String::from("vcenter.example.com"),
            source: GovcError::UnknownTask(String::from("govc-1")),
        };
        let config = CliError::Config(ConfigError::Invalid(String::from("keep_count")));

        assert!(is_logged(&setup));
        assert!(is_logged(&connect));
        assert!(!is_logged(&config));
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Setup(SetupError::DatacenterNotFound(String::from("dc9")));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "setup failed: datacenter dc9 not found\n");
    }
}
