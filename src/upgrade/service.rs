use std::sync::Arc;

use time::OffsetDateTime;

use super::download::DownloadProgress;
use super::scheduler::Scheduler;
use super::{StatusReport, Updater};

/// Consumer-facing handle on the update engine.
///
/// Constructed once by the process and shared by reference with whatever
/// surfaces status and triggers (dashboard handlers, the CLI).
pub struct UpdateService {
    updater: Arc<Updater>,
    scheduler: Scheduler,
}

impl UpdateService {
    pub fn new(updater: Updater) -> Self {
        let updater = Arc::new(updater);
        let scheduler = Scheduler::new(Arc::clone(&updater));
        Self { updater, scheduler }
    }

    pub fn updater(&self) -> &Updater {
        &self.updater
    }

    /// Clean up after an interrupted swap and run the startup check if the
    /// last one is older than the debounce window.
    pub fn startup(&self) {
        self.updater.installer().sweep_leftovers();
        if self.updater.should_check_at_startup(OffsetDateTime::now_utc()) {
            tracing::info!("running startup update check");
            if self.force_check() {
                self.force_install(|_| {});
            }
        } else {
            tracing::info!("skipping startup update check, last check is recent");
        }
    }

    pub fn get_status(&self) -> StatusReport {
        self.updater.get_status()
    }

    pub fn force_check(&self) -> bool {
        self.updater.force_check()
    }

    pub fn force_install<F>(&self, progress: F) -> bool
    where
        F: FnMut(DownloadProgress),
    {
        self.updater.force_install(progress)
    }

    pub fn start_auto_check(&self) -> std::io::Result<()> {
        self.scheduler.start()
    }

    pub fn stop_auto_check(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn is_auto_checking(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Block until the auto-check loop exits.
    pub fn wait(&self) {
        self.scheduler.wait();
    }
}
