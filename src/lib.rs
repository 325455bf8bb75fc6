//! Crate entry point for **upkeep**.
//!
//! upkeep is the self-update engine of a long-running background service. It
//! polls a release feed, downloads the new executable, smoke-tests it and
//! hands the actual swap to a separate `upkeep-relaunch` process, because a
//! running program cannot replace its own file on every platform.
//!
//! Each submodule encapsulates one responsibility; the `pub use` re-exports
//! are what the binaries and embedding services use.

mod commands;
pub mod config;
pub mod error;
pub mod logging;
mod paths;
mod progress;
pub mod relaunch;
pub mod upgrade;

pub use commands::{CURRENT_VERSION, cmd_check, cmd_install, cmd_run, cmd_status, open_service};
pub use config::Settings;
pub use error::UpdateError;
pub use paths::{paths, upkeep_home};
pub use upgrade::service::UpdateService;
pub use upgrade::status::{Phase, UpdateStatus};
pub use upgrade::{CheckOutcome, InstallOutcome, StatusReport, Updater};
