use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from `config.toml`.
///
/// Every key is optional; a missing file yields [`Settings::default`].
///
/// Example TOML:
/// ```toml
/// [feed]
/// repo      = "acme/guardian"
/// platform  = "windows"
/// extension = ".exe"
///
/// [schedule]
/// check_interval_secs = 3600
///
/// [install]
/// executable = 'C:\Program Files\Guardian\guardian.exe'
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub feed: FeedSettings,
    pub schedule: ScheduleSettings,
    pub install: InstallSettings,
    pub paths: PathSettings,
}

/// Where releases come from and how they are fetched.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedSettings {
    /// GitHub `owner/name` slug.
    pub repo: String,
    /// Explicit "latest release" endpoint; overrides `repo`.
    pub url: Option<String>,
    /// Marker an asset name must contain to be preferred.
    pub platform: String,
    /// Executable extension an asset name must end with.
    pub extension: String,
    /// Skip any configured outbound proxy for feed and artifact requests.
    pub bypass_proxy: bool,
    pub check_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            repo: "upkeep-dev/upkeep".to_string(),
            url: None,
            platform: std::env::consts::OS.to_string(),
            extension: std::env::consts::EXE_SUFFIX.to_string(),
            bypass_proxy: true,
            check_timeout_secs: 30,
            download_timeout_secs: 300,
        }
    }
}

impl FeedSettings {
    pub fn latest_release_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "https://api.github.com/repos/{}/releases/latest",
                self.repo
            ),
        }
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Cadence of the background loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Minimum time between two periodic checks.
    pub check_interval_secs: u64,
    /// How often the loop wakes to look at the clock.
    pub poll_interval_secs: u64,
    /// Minimum age of the last check before a startup check runs.
    pub startup_debounce_secs: u64,
    /// How long `stop` waits for the loop to exit.
    pub stop_timeout_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 3600,
            poll_interval_secs: 600,
            startup_debounce_secs: 600,
            stop_timeout_secs: 5,
        }
    }
}

impl ScheduleSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn startup_debounce(&self) -> Duration {
        Duration::from_secs(self.startup_debounce_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Candidate verification and swap timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallSettings {
    /// Canonical executable; defaults to the running binary.
    pub executable: Option<PathBuf>,
    /// Relaunch helper; defaults to `upkeep-relaunch` next to the executable.
    pub helper: Option<PathBuf>,
    /// Harmless flag the candidate is smoke-tested with.
    pub verify_arg: String,
    pub verify_timeout_secs: u64,
    /// Delay before the helper terminates the live process.
    pub grace_secs: u64,
    /// Delay after termination before files are touched.
    pub settle_secs: u64,
    /// Delay between the swap and the relaunch.
    pub relaunch_delay_secs: u64,
    /// Delay between the relaunch and the backup removal.
    pub backup_cleanup_secs: u64,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            executable: None,
            helper: None,
            verify_arg: "--version".to_string(),
            verify_timeout_secs: 10,
            grace_secs: 3,
            settle_secs: 2,
            relaunch_delay_secs: 2,
            backup_cleanup_secs: 5,
        }
    }
}

/// Overrides for files the engine writes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PathSettings {
    pub status_file: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
}

/// Load settings from `path`.
///
/// # Errors
/// - Returns an error if the file exists but cannot be read.
/// - Returns an error if parsing the TOML fails.
///
/// # Notes
/// A missing file is not an error: defaults are returned.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Settings::default());
    }
    let txt = fs::read_to_string(path)
        .with_context(|| format!("cannot read config: {}", path.display()))?;
    let settings: Settings = toml::from_str(&txt)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(settings)
}
