//! Logging setup.
//!
//! Installs a global tracing subscriber writing to stderr and to a daily
//! rolling file under the upkeep home, so the background service and the
//! relaunch helper both leave a trail after their console is gone.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing. `prefix` names the log file (`<prefix>.<date>`).
///
/// Subsequent calls are no-ops. When `log_dir` cannot be created the file
/// layer is skipped and only stderr is used.
pub fn init(log_dir: &Path, prefix: &str) {
    if LOG_GUARD.get().is_some() {
        return;
    }

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let file_layer = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = rolling::daily(log_dir, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            Some(fmt::layer().with_ansi(false).with_writer(writer))
        }
        Err(err) => {
            eprintln!("cannot create log directory {}: {err}", log_dir.display());
            None
        }
    };

    let subscriber = Registry::default()
        .with(build_env_filter())
        .with(stderr_layer)
        .with(file_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return;
    }
    tracing::debug!(dir = %log_dir.display(), "logging initialized");
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
