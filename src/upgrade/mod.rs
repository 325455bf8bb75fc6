pub mod artifact;
pub mod download;
pub mod github;
pub mod install;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod version;

use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;

use crate::config::Settings;
use crate::error::{Result, UpdateError};
use download::{DownloadManager, DownloadProgress};
use github::VersionChecker;
use install::{InstallReport, Installer};
use status::{Phase, StatusStore, UpdateStatus};

/// Result of [`Updater::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpdateAvailable { version: String },
    UpToDate,
    /// Another operation was active; nothing was done.
    Rejected { busy: Phase },
    /// The check ran and failed; the error is in the status record.
    Failed,
}

impl CheckOutcome {
    pub fn update_available(&self) -> bool {
        matches!(self, Self::UpdateAvailable { .. })
    }
}

/// Result of [`Updater::download_and_install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The helper took over; expect this process to be terminated.
    HandedOff { version: String },
    /// The published artifact is what is already installed.
    Unchanged { version: String },
    /// No newer version is known.
    NothingToInstall,
    Rejected { busy: Phase },
    Failed,
}

impl InstallOutcome {
    pub fn started(&self) -> bool {
        matches!(self, Self::HandedOff { .. } | Self::Unchanged { .. })
    }
}

/// Status record plus fields derived for display.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub record: UpdateStatus,
    pub last_check_human: String,
    pub update_available: bool,
    pub check_interval_hours: f64,
}

/// The update engine: check, download, install, each serialized through
/// the status store.
pub struct Updater {
    settings: Settings,
    store: StatusStore,
    checker: VersionChecker,
    downloader: DownloadManager,
    installer: Installer,
}

impl Updater {
    /// Build the engine for the running binary `current_version`.
    ///
    /// # Errors
    /// Returns an error if the live executable cannot be located.
    pub fn new(settings: Settings, status_file: PathBuf, current_version: &str) -> Result<Self> {
        let mut installer = Installer::from_settings(settings.install.clone())?;
        if let Some(dir) = &settings.paths.download_dir {
            installer = installer.with_plan_dir(dir);
        }
        Ok(Self::with_installer(settings, status_file, current_version, installer))
    }

    pub fn with_installer(
        settings: Settings,
        status_file: PathBuf,
        current_version: &str,
        installer: Installer,
    ) -> Self {
        let store = StatusStore::load(status_file, current_version);
        let checker = VersionChecker::new(settings.feed.clone(), current_version);
        let downloader = DownloadManager::new(
            settings.feed.clone(),
            settings.paths.download_dir.clone(),
            current_version,
        );
        Self {
            settings,
            store,
            checker,
            downloader,
            installer,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    pub fn snapshot(&self) -> UpdateStatus {
        self.store.snapshot()
    }

    /// Query the feed and record what it offers.
    ///
    /// Rejected without effect while another operation is active. The store
    /// lock is not held during the request.
    pub fn check(&self) -> CheckOutcome {
        if let Err(busy) = self.store.try_begin(Phase::Checking) {
            tracing::info!(%busy, "update check rejected, operation in progress");
            return CheckOutcome::Rejected { busy };
        }

        match self.checker.fetch_candidate() {
            Ok(candidate) => {
                let version = candidate.version.clone();
                let current = self.store.update(|s| {
                    s.record_release(candidate.version, candidate.download_url, now());
                    s.current_version.clone()
                });
                if version::is_newer(&current, &version) {
                    tracing::info!(%version, %current, "new version available");
                    CheckOutcome::UpdateAvailable { version }
                } else {
                    tracing::info!(%current, "up to date");
                    CheckOutcome::UpToDate
                }
            }
            Err(err) => {
                tracing::error!("update check failed: {err}");
                self.store.update(|s| {
                    s.advance_last_check(now());
                    s.fail(format!("update check failed: {err}"));
                });
                CheckOutcome::Failed
            }
        }
    }

    /// Fetch and install the known newer version, reporting progress.
    pub fn download_and_install<F>(&self, progress: F) -> InstallOutcome
    where
        F: FnMut(DownloadProgress),
    {
        let snapshot = self.store.snapshot();
        let (Some(version), Some(url)) = (snapshot.available_version, snapshot.download_url) else {
            tracing::info!("no download URL or version available");
            return InstallOutcome::NothingToInstall;
        };
        if !version::is_newer(&snapshot.current_version, &version) {
            tracing::info!(%version, "no update available to install");
            return InstallOutcome::NothingToInstall;
        }

        if let Err(busy) = self.store.try_begin(Phase::Downloading) {
            tracing::info!(%busy, "install rejected, operation in progress");
            return InstallOutcome::Rejected { busy };
        }

        match self.fetch_and_install(&url, progress) {
            Ok(InstallReport::HandedOff { .. }) => {
                self.store.update(|s| {
                    s.status = Phase::Success;
                    s.error = None;
                });
                tracing::info!(%version, "update handed off, restart pending");
                InstallOutcome::HandedOff { version }
            }
            Ok(InstallReport::Unchanged) => {
                self.store.update(|s| {
                    s.status = Phase::Success;
                    s.error = None;
                });
                InstallOutcome::Unchanged { version }
            }
            Err(err) => {
                tracing::error!(%version, "update failed: {err}");
                self.store
                    .update(|s| s.fail(format!("update download/install failed: {err}")));
                InstallOutcome::Failed
            }
        }
    }

    fn fetch_and_install<F>(&self, url: &str, progress: F) -> Result<InstallReport, UpdateError>
    where
        F: FnMut(DownloadProgress),
    {
        let artifact = self.downloader.download(url, progress)?;
        self.store.update(|s| s.status = Phase::Installing);
        // `artifact` is deleted when it goes out of scope.
        self.installer.install(&artifact)
    }

    /// Whether the periodic loop is due for a check at `now`.
    pub fn should_check(&self, now: OffsetDateTime) -> bool {
        older_than(
            self.store.snapshot().last_check,
            now,
            self.settings.schedule.check_interval(),
        )
    }

    /// Whether a check should run at process launch.
    ///
    /// Uses the short debounce window so rapid restarts do not each hit
    /// the feed.
    pub fn should_check_at_startup(&self, now: OffsetDateTime) -> bool {
        older_than(
            self.store.snapshot().last_check,
            now,
            self.settings.schedule.startup_debounce(),
        )
    }

    pub fn get_status(&self) -> StatusReport {
        let record = self.store.snapshot();
        let update_available = record
            .available_version
            .as_deref()
            .is_some_and(|v| version::is_newer(&record.current_version, v));
        let last_check_human = match record.last_check {
            Some(ts) => format_time_ago(ts, now()),
            None => "Never".to_string(),
        };
        StatusReport {
            record,
            last_check_human,
            update_available,
            check_interval_hours: self.settings.schedule.check_interval_secs as f64 / 3600.0,
        }
    }

    pub fn force_check(&self) -> bool {
        self.check().update_available()
    }

    /// Install the known update, if any. No-op otherwise.
    pub fn force_install<F>(&self, progress: F) -> bool
    where
        F: FnMut(DownloadProgress),
    {
        self.download_and_install(progress).started()
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn older_than(last: Option<OffsetDateTime>, now: OffsetDateTime, window: std::time::Duration) -> bool {
    match last {
        None => true,
        Some(ts) => (now - ts) >= window,
    }
}

/// "Just now", "5 minutes ago", "1 hour ago", "3 days ago".
pub fn format_time_ago(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let secs = (now - then).whole_seconds().max(0);
    let (n, unit) = match secs {
        0..60 => return "Just now".to_string(),
        60..3600 => (secs / 60, "minute"),
        3600..86400 => (secs / 3600, "hour"),
        _ => (secs / 86400, "day"),
    };
    let plural = if n == 1 { "" } else { "s" };
    format!("{n} {unit}{plural} ago")
}
