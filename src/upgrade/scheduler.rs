//! Background loop driving periodic checks.
//!
//! One dedicated thread wakes every poll interval, asks the [`Updater`]
//! whether a check is due, and chains straight into download and install
//! when a newer version shows up. Stopping is cooperative: the stop signal is
//! observed at each wake, never in the middle of a check or install.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use time::OffsetDateTime;

use super::{CheckOutcome, InstallOutcome, Updater};

struct Worker {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Start/stop lifecycle around the update loop.
pub struct Scheduler {
    updater: Arc<Updater>,
    poll: Duration,
    stop_timeout: Duration,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(updater: Arc<Updater>) -> Self {
        let schedule = &updater.settings().schedule;
        let poll = schedule.poll_interval();
        let stop_timeout = schedule.stop_timeout();
        Self {
            updater,
            poll,
            stop_timeout,
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Start the loop. No-op when it is already running.
    pub fn start(&self) -> std::io::Result<()> {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            tracing::info!("auto-updater already running");
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let updater = Arc::clone(&self.updater);
        let poll = self.poll;
        let handle = thread::Builder::new()
            .name("upkeep-updater".into())
            .spawn(move || {
                run_loop(&updater, poll, &stop_rx);
                let _ = done_tx.send(());
            })?;

        *slot = Some(Worker {
            stop_tx,
            done_rx,
            handle,
        });
        tracing::info!(
            interval_secs = self.updater.settings().schedule.check_interval_secs,
            "auto-updater started"
        );
        Ok(())
    }

    /// Signal the loop and wait up to the stop timeout for it to exit.
    ///
    /// Returns `false` when the loop did not exit in time; the thread is
    /// then left behind rather than killed.
    pub fn stop(&self) -> bool {
        let Some(worker) = self.lock().take() else {
            return true;
        };
        let _ = worker.stop_tx.send(());
        match worker.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                tracing::info!("auto-updater stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "auto-updater did not stop in time, leaking its thread"
                );
                false
            }
        }
    }

    /// Block until the loop exits.
    pub fn wait(&self) {
        let worker = self.lock().take();
        if let Some(worker) = worker {
            let _ = worker.handle.join();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.lock().is_some() {
            self.stop();
        }
    }
}

fn run_loop(updater: &Updater, poll: Duration, stop_rx: &Receiver<()>) {
    loop {
        if panic::catch_unwind(AssertUnwindSafe(|| run_cycle(updater))).is_err() {
            tracing::error!("update cycle panicked, continuing");
        }
        match stop_rx.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// One wake of the loop. Failures are recorded by the updater and never
/// end the loop.
fn run_cycle(updater: &Updater) {
    if !updater.should_check(OffsetDateTime::now_utc()) {
        return;
    }
    tracing::info!("time for automatic update check");
    match updater.check() {
        CheckOutcome::UpdateAvailable { version } => {
            tracing::info!(%version, "starting silent update");
            match updater.download_and_install(|_| {}) {
                InstallOutcome::HandedOff { .. } | InstallOutcome::Unchanged { .. } => {}
                other => tracing::warn!(?other, "silent update did not complete"),
            }
        }
        CheckOutcome::Failed => tracing::warn!("automatic check failed, retrying next cycle"),
        CheckOutcome::UpToDate | CheckOutcome::Rejected { .. } => {}
    }
}
