use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

use super::github::http_client;
use crate::config::FeedSettings;
use crate::error::{Result, UpdateError};

const CHUNK_SIZE: usize = 8192;
const REPORT_EVERY: u64 = 1024 * 1024;

/// Progress of an artifact transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// `None` when the server sent no `Content-Length`.
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|t| *t > 0)
            .map(|t| self.downloaded as f64 * 100.0 / t as f64)
    }
}

/// Streams artifacts into private temporary files.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    feed: FeedSettings,
    dir: Option<PathBuf>,
    current_version: String,
}

impl DownloadManager {
    /// `dir` defaults to the system temp directory.
    pub fn new(feed: FeedSettings, dir: Option<PathBuf>, current_version: impl Into<String>) -> Self {
        Self {
            feed,
            dir,
            current_version: current_version.into(),
        }
    }

    /// Download `url` to a fresh temp file and return its closed path.
    ///
    /// The file is deleted when the returned [`TempPath`] is dropped, and on
    /// any failure before this returns.
    pub fn download<F>(&self, url: &str, progress: F) -> Result<TempPath>
    where
        F: FnMut(DownloadProgress),
    {
        tracing::info!(%url, "downloading update");
        let client = http_client(
            self.feed.download_timeout(),
            self.feed.bypass_proxy,
            &self.current_version,
        )?;
        let resp = client.get(url).send()?.error_for_status()?;
        let total = resp.content_length();

        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        let path = stream_to_temp(resp, total, &dir, &self.feed.extension, progress)?;
        tracing::info!(path = %path.display(), "download complete");
        Ok(path)
    }
}

/// Copy `reader` into a new temp file under `dir` in fixed-size chunks.
pub fn stream_to_temp<R, F>(
    mut reader: R,
    total: Option<u64>,
    dir: &Path,
    suffix: &str,
    mut progress: F,
) -> Result<TempPath>
where
    R: Read,
    F: FnMut(DownloadProgress),
{
    std::fs::create_dir_all(dir).map_err(|e| UpdateError::fs("cannot create download dir", dir, e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix("upkeep-download-")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| UpdateError::fs("cannot create temp file", dir, e))?;

    let mut buf = [0u8; CHUNK_SIZE];
    let mut downloaded: u64 = 0;
    let mut next_report = REPORT_EVERY;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // `tmp` is dropped here, which deletes the partial file.
            Err(e) => return Err(UpdateError::Network(format!("transfer interrupted: {e}"))),
        };
        tmp.write_all(&buf[..n])
            .map_err(|e| UpdateError::fs("cannot write download", tmp.path(), e))?;
        downloaded += n as u64;
        if downloaded >= next_report {
            next_report = downloaded + REPORT_EVERY;
            let p = DownloadProgress { downloaded, total };
            match p.percent() {
                Some(pct) => tracing::info!("download progress: {pct:.1}%"),
                None => tracing::info!("download progress: {downloaded} bytes"),
            }
            progress(p);
        }
    }

    if let Some(expected) = total
        && expected != downloaded
    {
        return Err(UpdateError::Network(format!(
            "truncated download: got {downloaded} of {expected} bytes"
        )));
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| UpdateError::fs("cannot flush download", tmp.path(), e))?;
    progress(DownloadProgress { downloaded, total });

    // Closes the handle, keeps the delete-on-drop path.
    Ok(tmp.into_temp_path())
}
