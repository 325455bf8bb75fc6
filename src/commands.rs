use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::ProgressBar;
use std::path::Path;
use std::time::Duration;

use crate::config::{Settings, load_settings};
use crate::logging;
use crate::paths::paths;
use crate::progress::{download_style, err_style, ok_style, spinner_style};
use crate::upgrade::service::UpdateService;
use crate::upgrade::status::Phase;
use crate::upgrade::{CheckOutcome, InstallOutcome, Updater};

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Load settings and build the service.
///
/// `config` overrides the default `config.toml` location.
pub fn open_service(config: Option<&Path>) -> Result<UpdateService> {
    let p = paths()?;
    let settings: Settings = load_settings(config.unwrap_or(&p.config))?;
    let status_file = settings.paths.status_file.clone().unwrap_or(p.status);
    let updater = Updater::new(settings, status_file, CURRENT_VERSION)
        .context("failed to initialize updater")?;
    Ok(UpdateService::new(updater))
}

/// Run as a background service.
///
/// Performs the startup check (debounced against the persisted last check),
/// starts the periodic loop and blocks until it exits. The process normally
/// ends when the relaunch helper terminates it for a swap.
pub fn cmd_run(config: Option<&Path>) -> Result<()> {
    logging::init(&paths()?.logs, "upkeep");
    tracing::info!(version = CURRENT_VERSION, "upkeep starting");

    let service = open_service(config)?;
    service.startup();
    service
        .start_auto_check()
        .context("failed to start update loop")?;
    service.wait();
    Ok(())
}

/// Check the feed once and print the outcome.
pub fn cmd_check(config: Option<&Path>) -> Result<()> {
    let service = open_service(config)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb.set_message("resolving latest release…");

    match service.updater().check() {
        CheckOutcome::UpdateAvailable { version } => {
            pb.set_style(ok_style());
            pb.finish_with_message(format!(
                "update available: {} → {}",
                CURRENT_VERSION, version
            ));
        }
        CheckOutcome::UpToDate => {
            pb.set_style(ok_style());
            pb.finish_with_message(format!("already up to date ({})", CURRENT_VERSION));
        }
        CheckOutcome::Rejected { busy } => {
            pb.set_style(err_style());
            pb.finish_with_message(format!("another operation is in progress ({busy})"));
        }
        CheckOutcome::Failed => {
            let err = service.get_status().record.error.unwrap_or_default();
            pb.set_style(err_style());
            pb.finish_with_message(err);
        }
    }
    Ok(())
}

/// Download and install the known update with a progress bar.
pub fn cmd_install(config: Option<&Path>) -> Result<()> {
    let service = open_service(config)?;
    if service.get_status().record.available_version.is_none() {
        service.updater().check();
    }

    let pb = ProgressBar::new(0);
    pb.set_style(download_style());
    pb.set_message("downloading…");
    let outcome = service.updater().download_and_install(|p| {
        if let Some(total) = p.total {
            pb.set_length(total);
        }
        pb.set_position(p.downloaded);
    });

    match outcome {
        InstallOutcome::HandedOff { version } => {
            pb.set_style(ok_style());
            pb.finish_with_message(format!("installing {version}, restart pending"));
        }
        InstallOutcome::Unchanged { version } => {
            pb.set_style(ok_style());
            pb.finish_with_message(format!("already up-to-date ({version})"));
        }
        InstallOutcome::NothingToInstall => {
            pb.set_style(ok_style());
            pb.finish_with_message("no update available to install");
        }
        InstallOutcome::Rejected { busy } => {
            pb.set_style(err_style());
            pb.finish_with_message(format!("another operation is in progress ({busy})"));
        }
        InstallOutcome::Failed => {
            let err = service.get_status().record.error.unwrap_or_default();
            pb.set_style(err_style());
            pb.finish_with_message(err);
        }
    }
    Ok(())
}

/// Print the status record, human-readable or as JSON.
pub fn cmd_status(config: Option<&Path>, json: bool) -> Result<()> {
    let report = open_service(config)?.get_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let phase = report.record.status.to_string();
    let phase = match report.record.status {
        Phase::Error => phase.red(),
        Phase::Success => phase.green(),
        Phase::Idle => phase.normal(),
        _ => phase.yellow(),
    };
    println!("status:     {phase}");
    println!("current:    {}", report.record.current_version);
    match &report.record.available_version {
        Some(v) if report.update_available => println!("available:  {}", v.green()),
        Some(v) => println!("available:  {v}"),
        None => println!("available:  -"),
    }
    println!("last check: {}", report.last_check_human);
    if let Some(err) = &report.record.error {
        println!("error:      {}", err.red());
    }
    Ok(())
}
