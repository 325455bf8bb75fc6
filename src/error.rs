use std::path::{Path, PathBuf};

/// Failures of the update engine.
///
/// Every variant is caught at an operation boundary (check, download,
/// install) and turned into the persisted `error` field.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The feed or the artifact could not be reached, or the transfer broke.
    #[error("network error: {0}")]
    Network(String),
    /// The feed answered with something we could not understand.
    #[error("malformed release feed: {0}")]
    Parse(String),
    /// The release carries no artifact usable on this platform.
    #[error("no suitable asset: {0}")]
    NoAsset(String),
    /// The candidate failed its smoke test.
    #[error("candidate failed verification: {0}")]
    Verify(String),
    /// Copy, rename, spawn or cleanup failed.
    #[error("{context} ({}): {source}", path.display())]
    Filesystem {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl UpdateError {
    pub fn fs(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Filesystem {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
