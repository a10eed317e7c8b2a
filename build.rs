//! Build script rendering the `vsphere-backup` man pages.
//!
//! One page is written for the binary and one per subcommand
//! (`vsphere-backup-run.1`, `vsphere-backup-discover.1`) into `OUT_DIR`.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render_page(command: Command, title: &str, out_dir: &Path) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    Man::new(command).title(title).render(&mut buffer)?;
    File::create(out_dir.join(format!("{title}.1")))?.write_all(&buffer)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR was not set")?);

    let command = Cli::command();
    let binary = command.get_name().to_owned();
    for subcommand in command.get_subcommands() {
        let title = format!("{binary}-{}", subcommand.get_name());
        render_page(subcommand.clone(), &title, &out_dir)?;
    }
    render_page(command, &binary, &out_dir)?;

    Ok(())
}
