//! Binary swap executed outside the live process.
//!
//! A running executable cannot replace its own file on every platform, so the
//! installer writes a [`SwapPlan`] to disk and hands it to the
//! `upkeep-relaunch` helper. The helper terminates the live process, swaps the
//! files, relaunches the canonical executable and removes the plan.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::InstallSettings;
use crate::upgrade::artifact::{remove_quietly, spawn_fresh};

/// One step of a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SwapStep {
    /// Sleep.
    Wait { millis: u64 },
    /// Kill the live process by id and every process running an executable
    /// with this file name, except the helper.
    Terminate {
        image_name: String,
        #[serde(default)]
        pid: Option<u32>,
    },
    /// Move the live executable aside, replacing any previous backup.
    Backup { live: PathBuf, backup: PathBuf },
    /// Rename the candidate over the live path, or roll back and stop.
    Promote {
        candidate: PathBuf,
        live: PathBuf,
        backup: PathBuf,
    },
    /// Start `program` detached from the helper.
    Launch { program: PathBuf, args: Vec<String> },
    /// Delete a file if it exists.
    Remove { path: PathBuf },
}

/// Ordered swap procedure plus files removed whatever happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPlan {
    pub steps: Vec<SwapStep>,
    pub cleanup: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    RolledBack,
}

/// Paths a plan is built from.
#[derive(Debug, Clone)]
pub struct SwapTargets {
    pub live: PathBuf,
    pub candidate: PathBuf,
    pub backup: PathBuf,
    pub plan_file: PathBuf,
    pub relaunch_args: Vec<String>,
    /// Process to terminate, when the caller is itself the live executable.
    pub live_pid: Option<u32>,
}

impl SwapPlan {
    /// Standard procedure: wait, terminate, backup, promote, relaunch, clean up.
    pub fn build(targets: &SwapTargets, timing: &InstallSettings) -> Self {
        let image_name = targets
            .live
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let secs = |s: u64| SwapStep::Wait { millis: s * 1000 };

        Self {
            steps: vec![
                secs(timing.grace_secs),
                SwapStep::Terminate {
                    image_name,
                    pid: targets.live_pid,
                },
                secs(timing.settle_secs),
                SwapStep::Backup {
                    live: targets.live.clone(),
                    backup: targets.backup.clone(),
                },
                SwapStep::Promote {
                    candidate: targets.candidate.clone(),
                    live: targets.live.clone(),
                    backup: targets.backup.clone(),
                },
                secs(timing.relaunch_delay_secs),
                SwapStep::Launch {
                    program: targets.live.clone(),
                    args: targets.relaunch_args.clone(),
                },
                secs(timing.backup_cleanup_secs),
                // The backup goes even if the relaunch never came up.
                SwapStep::Remove {
                    path: targets.backup.clone(),
                },
            ],
            cleanup: vec![targets.plan_file.clone()],
        }
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Run every step in order, then the cleanup list.
    ///
    /// Only a rollback in [`SwapStep::Promote`] stops the sequence early;
    /// other failures are logged and the next step runs.
    pub fn execute(&self) -> SwapOutcome {
        let mut outcome = SwapOutcome::Swapped;
        for step in &self.steps {
            tracing::debug!(?step, "swap step");
            if run_step(step) == StepFlow::Stop {
                outcome = SwapOutcome::RolledBack;
                break;
            }
        }
        for path in &self.cleanup {
            remove_quietly(path);
        }
        outcome
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StepFlow {
    Continue,
    Stop,
}

fn run_step(step: &SwapStep) -> StepFlow {
    match step {
        SwapStep::Wait { millis } => {
            std::thread::sleep(Duration::from_millis(*millis));
        }
        SwapStep::Terminate { image_name, pid } => {
            let killed = terminate_live(*pid, image_name);
            tracing::info!(image_name, ?pid, killed, "terminated live process");
        }
        SwapStep::Backup { live, backup } => {
            if live.exists() {
                remove_quietly(backup);
                if let Err(e) = fs::rename(live, backup) {
                    tracing::error!(live = %live.display(), "cannot move live executable aside: {e}");
                }
            } else {
                tracing::warn!(live = %live.display(), "live executable missing");
            }
        }
        SwapStep::Promote {
            candidate,
            live,
            backup,
        } => {
            let promoted = candidate.exists()
                && match fs::rename(candidate, live) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(candidate = %candidate.display(), "cannot promote candidate: {e}");
                        false
                    }
                };
            if !promoted {
                roll_back(live, backup);
                return StepFlow::Stop;
            }
            tracing::info!(live = %live.display(), "candidate promoted");
        }
        SwapStep::Launch { program, args } => match spawn_detached(program, args) {
            Ok(pid) => tracing::info!(pid, program = %program.display(), "relaunched"),
            Err(e) => tracing::error!(program = %program.display(), "relaunch failed: {e}"),
        },
        SwapStep::Remove { path } => remove_quietly(path),
    }
    StepFlow::Continue
}

fn roll_back(live: &Path, backup: &Path) {
    if live.exists() {
        tracing::warn!("no candidate to promote, live executable left in place");
        return;
    }
    match fs::rename(backup, live) {
        Ok(()) => tracing::warn!(live = %live.display(), "rolled back to previous executable"),
        Err(e) => tracing::error!(backup = %backup.display(), "rollback failed: {e}"),
    }
}

/// Kill process `pid` and every process running an executable named
/// `image_name`, other than ourselves. Returns how many were signalled.
pub fn terminate_live(pid: Option<u32>, image_name: &str) -> usize {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet),
    );
    let me = sysinfo::get_current_pid().ok();
    let target = pid.map(Pid::from_u32);
    sys.processes()
        .values()
        .filter(|p| Some(p.pid()) != me)
        .filter(|p| Some(p.pid()) == target || runs_image(p, image_name))
        .filter(|p| p.kill())
        .count()
}

/// `name()` is the kernel's short name (15 bytes on Linux), so the
/// executable path and `argv[0]` are checked too.
fn runs_image(p: &sysinfo::Process, image_name: &str) -> bool {
    if image_name.is_empty() {
        return false;
    }
    let wanted = OsStr::new(image_name);
    p.name() == wanted
        || p.exe().and_then(Path::file_name) == Some(wanted)
        || p.cmd().first().and_then(|arg0| Path::new(arg0).file_name()) == Some(wanted)
}

/// Start `program` in its own process group with no inherited stdio.
pub fn spawn_detached(program: &Path, args: &[String]) -> std::io::Result<u32> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    }
    let child = spawn_fresh(&mut cmd)?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _td: tempfile::TempDir,
        targets: SwapTargets,
    }

    fn fixture() -> Fixture {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path();
        let targets = SwapTargets {
            live: dir.join("svc.exe"),
            candidate: dir.join("svc.exe.new"),
            backup: dir.join("svc.exe.backup"),
            plan_file: dir.join("plan.json"),
            relaunch_args: vec!["run".into()],
            live_pid: Some(4242),
        };
        Fixture { _td: td, targets }
    }

    /// Same as `build` minus the process-level steps.
    fn file_steps_only(plan: SwapPlan) -> SwapPlan {
        SwapPlan {
            steps: plan
                .steps
                .into_iter()
                .filter(|s| !matches!(s, SwapStep::Terminate { .. } | SwapStep::Launch { .. }))
                .collect(),
            cleanup: plan.cleanup,
        }
    }

    fn instant() -> InstallSettings {
        InstallSettings {
            grace_secs: 0,
            settle_secs: 0,
            relaunch_delay_secs: 0,
            backup_cleanup_secs: 0,
            ..InstallSettings::default()
        }
    }

    #[test]
    fn build_orders_steps_and_uses_timing() {
        let f = fixture();
        let plan = SwapPlan::build(&f.targets, &InstallSettings::default());
        let kinds: Vec<&str> = plan
            .steps
            .iter()
            .map(|s| match s {
                SwapStep::Wait { .. } => "wait",
                SwapStep::Terminate { .. } => "terminate",
                SwapStep::Backup { .. } => "backup",
                SwapStep::Promote { .. } => "promote",
                SwapStep::Launch { .. } => "launch",
                SwapStep::Remove { .. } => "remove",
            })
            .collect();
        assert_eq!(
            kinds,
            ["wait", "terminate", "wait", "backup", "promote", "wait", "launch", "wait", "remove"]
        );
        assert_eq!(plan.steps[0], SwapStep::Wait { millis: 3000 });
        assert_eq!(
            plan.steps[1],
            SwapStep::Terminate {
                image_name: "svc.exe".into(),
                pid: Some(4242),
            }
        );
        assert_eq!(plan.cleanup, vec![f.targets.plan_file.clone()]);
    }

    #[test]
    fn plan_survives_a_trip_through_disk() {
        let f = fixture();
        let plan = SwapPlan::build(&f.targets, &InstallSettings::default());
        plan.write(&f.targets.plan_file).unwrap();
        assert_eq!(SwapPlan::read(&f.targets.plan_file).unwrap(), plan);
    }

    #[test]
    fn swap_promotes_candidate_and_removes_backup_and_plan() {
        let f = fixture();
        let t = &f.targets;
        fs::write(&t.live, "old").unwrap();
        fs::write(&t.candidate, "new").unwrap();
        fs::write(&t.backup, "ancient").unwrap();
        let plan = file_steps_only(SwapPlan::build(t, &instant()));
        plan.write(&t.plan_file).unwrap();

        assert_eq!(plan.execute(), SwapOutcome::Swapped);
        assert_eq!(fs::read_to_string(&t.live).unwrap(), "new");
        assert!(!t.candidate.exists());
        assert!(!t.backup.exists());
        assert!(!t.plan_file.exists());
    }

    #[test]
    fn missing_candidate_rolls_back_and_stops() {
        let f = fixture();
        let t = &f.targets;
        fs::write(&t.live, "old").unwrap();
        let plan = file_steps_only(SwapPlan::build(t, &instant()));
        plan.write(&t.plan_file).unwrap();

        assert_eq!(plan.execute(), SwapOutcome::RolledBack);
        assert_eq!(fs::read_to_string(&t.live).unwrap(), "old");
        assert!(!t.backup.exists());
        assert!(!t.plan_file.exists());
    }

    #[test]
    fn missing_live_still_promotes_candidate() {
        let f = fixture();
        let t = &f.targets;
        fs::write(&t.candidate, "new").unwrap();
        let plan = file_steps_only(SwapPlan::build(t, &instant()));

        assert_eq!(plan.execute(), SwapOutcome::Swapped);
        assert_eq!(fs::read_to_string(&t.live).unwrap(), "new");
    }

    #[test]
    fn terminate_ignores_unknown_names() {
        assert_eq!(terminate_live(None, "upkeep-no-such-process-name"), 0);
        assert_eq!(terminate_live(None, ""), 0);
    }

    #[test]
    fn terminate_never_kills_itself() {
        assert_eq!(terminate_live(Some(std::process::id()), ""), 0);
    }

    #[test]
    fn plan_without_pid_still_reads() {
        let step: SwapStep =
            serde_json::from_str(r#"{"step": "terminate", "image_name": "svc.exe"}"#).unwrap();
        assert_eq!(
            step,
            SwapStep::Terminate {
                image_name: "svc.exe".into(),
                pid: None,
            }
        );
    }

    #[cfg(target_os = "linux")]
    fn start_sleeper(dir: &Path, name: &str) -> std::process::Child {
        let exe = dir.join(name);
        fs::copy("/bin/sleep", &exe).unwrap();
        spawn_fresh(Command::new(&exe).arg("30")).unwrap()
    }

    #[cfg(target_os = "linux")]
    fn exits_within(child: &mut std::process::Child, limit: Duration) -> bool {
        let deadline = std::time::Instant::now() + limit;
        while std::time::Instant::now() < deadline {
            if child.try_wait().unwrap().is_some() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        let _ = child.kill();
        let _ = child.wait();
        false
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_matches_names_longer_than_the_kernel_short_name() {
        let td = tempfile::tempdir().unwrap();
        let mut child = start_sleeper(td.path(), "guardian-service-x86");
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(terminate_live(None, "guardian-service-x86"), 1);
        assert!(exits_within(&mut child, Duration::from_secs(5)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_kills_recorded_pid_whatever_its_name() {
        let td = tempfile::tempdir().unwrap();
        let mut child = start_sleeper(td.path(), "svc-by-pid");

        assert_eq!(terminate_live(Some(child.id()), "upkeep-no-such-process-name"), 1);
        assert!(exits_within(&mut child, Duration::from_secs(5)));
    }

    #[cfg(unix)]
    #[test]
    fn spawn_detached_runs_program() {
        let td = tempfile::tempdir().unwrap();
        let marker = td.path().join("ran");
        let pid = spawn_detached(
            Path::new("/bin/sh"),
            &["-c".into(), format!("touch '{}'", marker.display())],
        )
        .unwrap();
        assert!(pid > 0);
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        assert!(marker.exists());
    }
}
