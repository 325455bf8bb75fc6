//! Relaunch helper.
//!
//! Spawned detached by the installer with a swap plan. It outlives the
//! service it replaces: terminates it, swaps the executable files, starts
//! the new version and deletes the plan.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use upkeep::relaunch::{SwapOutcome, SwapPlan};

#[derive(Parser, Debug)]
#[command(name = "upkeep-relaunch", version, about = "apply a staged upkeep update")]
struct Cli {
    /// Swap plan written by the installer
    #[arg(long, value_name = "FILE")]
    plan: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_dir = upkeep::paths()
        .map(|p| p.logs)
        .unwrap_or_else(|_| std::env::temp_dir());
    upkeep::logging::init(&log_dir, "upkeep-relaunch");

    let plan = SwapPlan::read(&cli.plan)
        .with_context(|| format!("cannot read swap plan {}", cli.plan.display()))?;
    tracing::info!(plan = %cli.plan.display(), steps = plan.steps.len(), "applying update");

    match plan.execute() {
        SwapOutcome::Swapped => tracing::info!("update applied"),
        SwapOutcome::RolledBack => tracing::warn!("update rolled back"),
    }
    Ok(())
}
