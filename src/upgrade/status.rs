//! Persisted update status.
//!
//! The record lives in a single JSON file that is rewritten after every
//! transition. All mutation goes through [`StatusStore::update`], which holds
//! the store's lock for the duration of the closure and the save that
//! follows it, so the file always matches the in-memory copy.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;

/// Phase of the update state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Checking,
    Downloading,
    Installing,
    Success,
    Error,
}

impl Phase {
    /// Phases during which no other operation may start.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Checking | Self::Downloading | Self::Installing)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// The persisted update record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub status: Phase,
    pub error: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
    pub available_version: Option<String>,
    pub download_url: Option<String>,
    pub current_version: String,
}

impl UpdateStatus {
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            status: Phase::Idle,
            error: None,
            last_check: None,
            available_version: None,
            download_url: None,
            current_version: current_version.into(),
        }
    }

    /// Record a successful check. Version and URL are always set together.
    pub fn record_release(&mut self, version: String, url: String, now: OffsetDateTime) {
        self.available_version = Some(version);
        self.download_url = Some(url);
        self.advance_last_check(now);
        self.status = Phase::Idle;
        self.error = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = Phase::Error;
        self.error = Some(message.into());
    }

    /// `last_check` never moves backwards.
    pub fn advance_last_check(&mut self, now: OffsetDateTime) {
        self.last_check = Some(match self.last_check {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }
}

/// Lock-guarded owner of the [`UpdateStatus`] record and its backing file.
#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,
    inner: Mutex<UpdateStatus>,
}

impl StatusStore {
    /// Restore the record from `path`, or start fresh when there is none.
    ///
    /// `current_version` always comes from the running binary, never from
    /// the file. A busy phase found on disk means the previous process died
    /// mid-operation; it is surfaced as an error so new work is not blocked.
    pub fn load(path: impl Into<PathBuf>, current_version: &str) -> Self {
        let path = path.into();
        let mut record = match read_record(&path) {
            Ok(Some(record)) => record,
            Ok(None) => UpdateStatus::new(current_version),
            Err(err) => {
                tracing::warn!(path = %path.display(), "cannot load update status: {err}");
                UpdateStatus::new(current_version)
            }
        };
        record.current_version = current_version.to_string();

        if record.status.is_busy() {
            tracing::warn!(phase = %record.status, "previous run was interrupted");
            let phase = record.status;
            record.fail(format!("interrupted while {phase}"));
        }
        if let Some(ts) = record.last_check {
            tracing::info!(last_check = %ts, status = %record.status, "update status loaded");
        }

        let store = Self {
            path,
            inner: Mutex::new(record),
        };
        store.save(&store.lock());
        store
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> UpdateStatus {
        self.lock().clone()
    }

    /// Run `op` inside the critical section and persist the result.
    pub fn update<R>(&self, op: impl FnOnce(&mut UpdateStatus) -> R) -> R {
        let mut guard = self.lock();
        let out = op(&mut guard);
        self.save(&guard);
        out
    }

    /// Enter `phase` unless another operation is already active.
    ///
    /// Returns the blocking phase when the caller is rejected.
    pub fn try_begin(&self, phase: Phase) -> Result<(), Phase> {
        self.update(|s| {
            if s.status.is_busy() {
                return Err(s.status);
            }
            s.status = phase;
            s.error = None;
            Ok(())
        })
    }

    fn lock(&self) -> MutexGuard<'_, UpdateStatus> {
        // A panic inside a critical section leaves a complete record behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the full record. Failures are logged; memory stays authoritative.
    fn save(&self, record: &UpdateStatus) {
        if let Err(err) = write_record(&self.path, record) {
            tracing::warn!(path = %self.path.display(), "cannot save update status: {err}");
        }
    }
}

fn read_record(path: &Path) -> anyhow::Result<Option<UpdateStatus>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn write_record(path: &Path, record: &UpdateStatus) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
