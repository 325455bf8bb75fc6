//! # upkeep
//!
//! **upkeep** keeps a background service on the latest published release.
//!
//! Features:
//! - `upkeep run` runs the service: startup check, then a periodic loop
//! - `upkeep check` asks the release feed once
//! - `upkeep install` downloads and installs the known update
//! - `upkeep status` shows the persisted update status
//! - `upkeep home` prints the upkeep home directory
//!
//! This CLI is built with [clap](https://docs.rs/clap).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use upkeep::{cmd_check, cmd_install, cmd_run, cmd_status, upkeep_home};

/// Command-line interface definition.
#[derive(Parser, Debug)]
#[command(
    name = "upkeep",
    version,
    about = "upkeep - self-updating background service",
    arg_required_else_help = true
)]
struct Cli {
    /// Use this config file instead of `$(upkeep home)/config.toml`
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the update service in the foreground
    Run,
    /// Check the release feed for a newer version
    Check,
    /// Download and install the available update
    Install,
    /// Show the update status
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the upkeep home directory
    Home,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let Some(cmd) = cli.cmd else {
        return Ok(());
    };

    match cmd {
        Cmd::Run => cmd_run(config),
        Cmd::Check => cmd_check(config),
        Cmd::Install => cmd_install(config),
        Cmd::Status { json } => cmd_status(config, json),
        Cmd::Home => {
            println!("{}", upkeep_home()?.display());
            Ok(())
        }
    }
}
