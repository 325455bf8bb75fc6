use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::artifact::{make_executable, remove_quietly, sha256_file, spawn_fresh, with_suffix};
use crate::config::InstallSettings;
use crate::error::{Result, UpdateError};
use crate::relaunch::{SwapPlan, SwapTargets, spawn_detached};

pub const HELPER_NAME: &str = "upkeep-relaunch";

/// What [`Installer::install`] did with the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallReport {
    /// The helper is running; this process should expect to be terminated.
    HandedOff { plan: PathBuf, helper_pid: u32 },
    /// The candidate is byte-identical to the live executable.
    Unchanged,
}

/// Verdict of the candidate smoke test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Passed,
    /// The candidate did not answer in time; treated as a pass.
    Inconclusive,
}

/// Stages a candidate next to the live executable and hands the swap off.
#[derive(Debug, Clone)]
pub struct Installer {
    live: PathBuf,
    helper: PathBuf,
    plan_dir: PathBuf,
    relaunch_args: Vec<String>,
    settings: InstallSettings,
}

impl Installer {
    /// Resolve the live executable and helper from `settings`.
    ///
    /// # Errors
    /// Returns an error if no executable is configured and the running
    /// binary's path cannot be determined.
    pub fn from_settings(settings: InstallSettings) -> Result<Self> {
        let live = match &settings.executable {
            Some(p) => p.clone(),
            None => std::env::current_exe()
                .map_err(|e| UpdateError::fs("cannot locate running executable", Path::new("."), e))?,
        };
        let helper = settings.helper.clone().unwrap_or_else(|| {
            live.with_file_name(format!("{HELPER_NAME}{}", std::env::consts::EXE_SUFFIX))
        });
        Ok(Self {
            live,
            helper,
            plan_dir: std::env::temp_dir(),
            relaunch_args: std::env::args().skip(1).collect(),
            settings,
        })
    }

    pub fn with_plan_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plan_dir = dir.into();
        self
    }

    pub fn with_relaunch_args(mut self, args: Vec<String>) -> Self {
        self.relaunch_args = args;
        self
    }

    pub fn live_path(&self) -> &Path {
        &self.live
    }

    /// `<live>.new`, on the same volume as the live executable.
    pub fn surrogate_path(&self) -> PathBuf {
        with_suffix(&self.live, "new")
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.live, "backup")
    }

    /// Stage, verify and hand the candidate at `artifact` to the helper.
    ///
    /// On any error the surrogate is removed and the live executable has not
    /// been touched.
    pub fn install(&self, artifact: &Path) -> Result<InstallReport> {
        let surrogate = self.surrogate_path();
        let result = self.stage_and_hand_off(artifact, &surrogate);
        match &result {
            Ok(InstallReport::HandedOff { .. }) => {}
            Ok(InstallReport::Unchanged) | Err(_) => remove_quietly(&surrogate),
        }
        result
    }

    fn stage_and_hand_off(&self, artifact: &Path, surrogate: &Path) -> Result<InstallReport> {
        remove_quietly(surrogate);
        fs::copy(artifact, surrogate)
            .map_err(|e| UpdateError::fs("cannot stage candidate", surrogate, e))?;
        make_executable(surrogate)
            .map_err(|e| UpdateError::fs("cannot mark candidate executable", surrogate, e))?;
        tracing::info!(path = %surrogate.display(), "candidate staged");

        if self.live.exists() {
            let old = sha256_file(&self.live).unwrap_or_default();
            let new = sha256_file(surrogate).unwrap_or_default();
            if !old.is_empty() && old == new {
                tracing::info!("candidate matches the live executable, nothing to swap");
                return Ok(InstallReport::Unchanged);
            }
        }

        match self.verify(surrogate)? {
            Verification::Passed => tracing::info!("candidate verified"),
            Verification::Inconclusive => {
                tracing::warn!("candidate verification timed out, assuming OK")
            }
        }

        if !self.helper.exists() {
            return Err(UpdateError::fs(
                "relaunch helper not found",
                &self.helper,
                std::io::ErrorKind::NotFound.into(),
            ));
        }

        fs::create_dir_all(&self.plan_dir)
            .map_err(|e| UpdateError::fs("cannot create plan directory", &self.plan_dir, e))?;
        let plan_path = self
            .plan_dir
            .join(format!("upkeep-swap-{}.json", std::process::id()));
        let plan = SwapPlan::build(
            &SwapTargets {
                live: self.live.clone(),
                candidate: surrogate.to_path_buf(),
                backup: self.backup_path(),
                plan_file: plan_path.clone(),
                relaunch_args: self.relaunch_args.clone(),
                live_pid: self.running_as_live().then(std::process::id),
            },
            &self.settings,
        );
        plan.write(&plan_path)
            .map_err(|e| UpdateError::fs("cannot write swap plan", &plan_path, e))?;

        let args = vec!["--plan".to_string(), plan_path.display().to_string()];
        let helper_pid = match spawn_detached(&self.helper, &args) {
            Ok(pid) => pid,
            Err(e) => {
                remove_quietly(&plan_path);
                return Err(UpdateError::fs("cannot launch relaunch helper", &self.helper, e));
            }
        };
        tracing::info!(helper_pid, plan = %plan_path.display(), "swap handed off to relaunch helper");
        Ok(InstallReport::HandedOff {
            plan: plan_path,
            helper_pid,
        })
    }

    /// Whether this process is the live executable, so the helper can
    /// terminate it by id.
    fn running_as_live(&self) -> bool {
        let Ok(exe) = std::env::current_exe() else {
            return false;
        };
        let canonical = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
        canonical(&exe) == canonical(&self.live)
    }

    /// Run the candidate with the diagnostic flag under a deadline.
    pub fn verify(&self, candidate: &Path) -> Result<Verification> {
        let timeout = Duration::from_secs(self.settings.verify_timeout_secs);
        let mut child = spawn_fresh(
            Command::new(candidate)
                .arg(&self.settings.verify_arg)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null()),
        )
        .map_err(|e| UpdateError::Verify(format!("cannot run {}: {e}", candidate.display())))?;

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(Verification::Passed),
                Ok(Some(status)) => {
                    return Err(UpdateError::Verify(format!(
                        "`{} {}` exited with {status}",
                        candidate.display(),
                        self.settings.verify_arg
                    )));
                }
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(Verification::Inconclusive);
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => return Err(UpdateError::Verify(format!("cannot wait for candidate: {e}"))),
            }
        }
    }

    /// Remove leftovers of an interrupted swap.
    ///
    /// Only runs while the live executable exists, so a backup is never the
    /// last runnable copy when it is deleted.
    pub fn sweep_leftovers(&self) {
        if !self.live.exists() {
            return;
        }
        for path in [self.surrogate_path(), self.backup_path()] {
            if path.exists() {
                tracing::info!(path = %path.display(), "removing leftover from a previous update");
                remove_quietly(&path);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    struct Fixture {
        td: tempfile::TempDir,
        installer: Installer,
    }

    fn script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        make_executable(path).unwrap();
    }

    fn fixture(helper_body: Option<&str>) -> Fixture {
        let td = tempfile::tempdir().unwrap();
        let live = td.path().join("svc");
        script(&live, "echo live 1.1.0");
        let helper = td.path().join(HELPER_NAME);
        if let Some(body) = helper_body {
            script(&helper, body);
        }
        let plans = td.path().join("plans");
        fs::create_dir_all(&plans).unwrap();

        let settings = InstallSettings {
            executable: Some(live),
            helper: Some(helper),
            verify_timeout_secs: 2,
            ..InstallSettings::default()
        };
        let installer = Installer::from_settings(settings)
            .unwrap()
            .with_plan_dir(plans)
            .with_relaunch_args(vec!["run".into()]);
        Fixture { td, installer }
    }

    fn candidate(f: &Fixture, body: &str) -> PathBuf {
        let p = f.td.path().join("download.tmp");
        script(&p, body);
        p
    }

    #[test]
    fn failed_smoke_test_leaves_live_untouched() {
        let f = fixture(Some("exit 0"));
        let before = fs::read(f.installer.live_path()).unwrap();
        let cand = candidate(&f, "exit 3");

        let err = f.installer.install(&cand).unwrap_err();
        assert!(matches!(err, UpdateError::Verify(_)), "{err}");
        assert_eq!(fs::read(f.installer.live_path()).unwrap(), before);
        assert!(!f.installer.surrogate_path().exists());
        assert!(!f.installer.backup_path().exists());
    }

    #[test]
    fn missing_helper_is_filesystem_error_and_cleans_up() {
        let f = fixture(None);
        let before = fs::read(f.installer.live_path()).unwrap();
        let cand = candidate(&f, "echo 1.2.0");

        let err = f.installer.install(&cand).unwrap_err();
        assert!(matches!(err, UpdateError::Filesystem { .. }), "{err}");
        assert_eq!(fs::read(f.installer.live_path()).unwrap(), before);
        assert!(!f.installer.surrogate_path().exists());
    }

    #[test]
    fn verified_candidate_is_handed_to_helper() {
        let f = fixture(Some("exit 0"));
        let cand = candidate(&f, "echo 1.2.0");

        let report = f.installer.install(&cand).unwrap();
        let InstallReport::HandedOff { plan, helper_pid } = report else {
            panic!("expected hand-off, got {report:?}");
        };
        assert!(helper_pid > 0);
        assert!(f.installer.surrogate_path().exists());

        let plan = SwapPlan::read(&plan).unwrap();
        assert!(plan.steps.iter().any(|s| matches!(
            s,
            crate::relaunch::SwapStep::Launch { args, .. } if args == &["run".to_string()]
        )));
        // The test binary is not `svc`, so no pid is handed to the helper.
        assert!(plan.steps.iter().any(|s| matches!(
            s,
            crate::relaunch::SwapStep::Terminate { image_name, pid: None } if image_name == "svc"
        )));
        assert_eq!(
            fs::read_to_string(f.installer.live_path()).unwrap(),
            "#!/bin/sh\necho live 1.1.0\n"
        );
    }

    #[test]
    fn identical_candidate_is_not_swapped() {
        let f = fixture(Some("exit 0"));
        let cand = f.td.path().join("same");
        fs::copy(f.installer.live_path(), &cand).unwrap();

        assert_eq!(f.installer.install(&cand).unwrap(), InstallReport::Unchanged);
        assert!(!f.installer.surrogate_path().exists());
    }

    #[test]
    fn hanging_candidate_is_inconclusive() {
        let mut f = fixture(Some("exit 0"));
        f.installer.settings.verify_timeout_secs = 1;
        let cand = candidate(&f, "sleep 30");
        assert_eq!(f.installer.verify(&cand).unwrap(), Verification::Inconclusive);
    }

    #[test]
    fn unrunnable_candidate_fails_verification() {
        let f = fixture(Some("exit 0"));
        let p = f.td.path().join("garbage");
        fs::write(&p, "not a program").unwrap();
        assert!(matches!(f.installer.verify(&p), Err(UpdateError::Verify(_))));
    }

    #[test]
    fn sweep_removes_stale_surrogate_and_backup() {
        let f = fixture(None);
        fs::write(f.installer.surrogate_path(), "stale").unwrap();
        fs::write(f.installer.backup_path(), "stale").unwrap();
        f.installer.sweep_leftovers();
        assert!(!f.installer.surrogate_path().exists());
        assert!(!f.installer.backup_path().exists());
        assert!(f.installer.live_path().exists());
    }

    #[test]
    fn live_pid_is_recorded_only_for_the_running_executable() {
        let f = fixture(None);
        assert!(!f.installer.running_as_live());

        let settings = InstallSettings {
            executable: Some(std::env::current_exe().unwrap()),
            ..InstallSettings::default()
        };
        assert!(Installer::from_settings(settings).unwrap().running_as_live());
    }

    #[test]
    fn default_helper_sits_next_to_live() {
        let settings = InstallSettings {
            executable: Some(PathBuf::from("/opt/svc/svc")),
            ..InstallSettings::default()
        };
        let i = Installer::from_settings(settings).unwrap();
        assert_eq!(i.helper, PathBuf::from("/opt/svc/upkeep-relaunch"));
        assert_eq!(i.surrogate_path(), PathBuf::from("/opt/svc/svc.new"));
        assert_eq!(i.backup_path(), PathBuf::from("/opt/svc/svc.backup"));
    }
}
