use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use super::version::normalize_tag;
use crate::config::FeedSettings;
use crate::error::{Result, UpdateError};

#[derive(Debug, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

/// A release version paired with the artifact chosen for this platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub version: String,
    pub download_url: String,
}

/// Build a client for a single request.
///
/// With `bypass_proxy` the client ignores `HTTP_PROXY`/`HTTPS_PROXY`; the
/// override lives only as long as the client does, so nothing global is
/// touched and there is nothing to restore.
pub fn http_client(timeout: Duration, bypass_proxy: bool, current_version: &str) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    let agent = format!("upkeep/{current_version}");
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&agent).unwrap_or_else(|_| HeaderValue::from_static("upkeep")),
    );
    if let Ok(tok) = env::var("GITHUB_TOKEN") {
        let value = HeaderValue::from_str(&format!("Bearer {}", tok))
            .map_err(|e| UpdateError::Network(format!("invalid GITHUB_TOKEN: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }

    let mut builder = Client::builder().default_headers(headers).timeout(timeout);
    if bypass_proxy {
        builder = builder.no_proxy();
    }
    Ok(builder.build()?)
}

/// Queries the release feed and picks the artifact for this platform.
#[derive(Debug, Clone)]
pub struct VersionChecker {
    feed: FeedSettings,
    current_version: String,
}

impl VersionChecker {
    pub fn new(feed: FeedSettings, current_version: impl Into<String>) -> Self {
        Self {
            feed,
            current_version: current_version.into(),
        }
    }

    /// Fetch the latest release and select its artifact.
    pub fn fetch_candidate(&self) -> Result<Candidate> {
        let url = self.feed.latest_release_url();
        tracing::info!(%url, "checking for updates");
        let client = http_client(
            self.feed.check_timeout(),
            self.feed.bypass_proxy,
            &self.current_version,
        )?;
        let body = client.get(&url).send()?.error_for_status()?.text()?;
        let release: Release = serde_json::from_str(&body)
            .map_err(|e| UpdateError::Parse(format!("invalid release document: {e}")))?;
        candidate_from_release(&release, &self.feed.platform, &self.feed.extension)
    }
}

pub fn candidate_from_release(
    release: &Release,
    platform: &str,
    extension: &str,
) -> Result<Candidate> {
    let version = normalize_tag(&release.tag_name);
    if version.is_empty() {
        return Err(UpdateError::Parse("no version tag in release".into()));
    }
    let asset = select_asset(&release.assets, platform, extension).ok_or_else(|| {
        UpdateError::NoAsset(format!(
            "release {} has no '{extension}' asset",
            release.tag_name
        ))
    })?;
    Ok(Candidate {
        version: version.to_string(),
        download_url: asset.browser_download_url.clone(),
    })
}

/// Release files that are never the executable itself. Only consulted when
/// the platform has no executable extension to match on.
const NON_EXECUTABLE_SUFFIXES: &[&str] = &[
    ".txt", ".md", ".json", ".sha256", ".sha512", ".sig", ".asc", ".tar.gz", ".tgz", ".tar.xz",
    ".zip", ".exe", ".msi", ".deb", ".rpm", ".dmg", ".pkg",
];

/// Prefer `*<platform>*<extension>`, else the first `*<extension>`.
///
/// An empty `extension` matches any name except the known non-executable
/// suffixes.
pub fn select_asset<'a>(assets: &'a [Asset], platform: &str, extension: &str) -> Option<&'a Asset> {
    let ext = extension.to_ascii_lowercase();
    let marker = platform.to_ascii_lowercase();
    let usable = |a: &&Asset| {
        let name = a.name.to_ascii_lowercase();
        if ext.is_empty() {
            !NON_EXECUTABLE_SUFFIXES.iter().any(|s| name.ends_with(s))
        } else {
            name.ends_with(&ext)
        }
    };

    assets
        .iter()
        .filter(usable)
        .find(|a| a.name.to_ascii_lowercase().contains(&marker))
        .or_else(|| assets.iter().find(usable))
}
