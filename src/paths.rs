use anyhow::{Result, bail};
use std::{env, path::PathBuf};

/// Well-known locations under the upkeep home directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config: PathBuf,
    pub status: PathBuf,
    pub logs: PathBuf,
}

/// Resolve the upkeep home directory.
///
/// - Windows: `%APPDATA%\upkeep`
/// - elsewhere: `$XDG_CONFIG_HOME/upkeep`, falling back to `~/.config/upkeep`
pub fn upkeep_home() -> Result<PathBuf> {
    if cfg!(windows) {
        if let Some(appdata) = env::var_os("APPDATA") {
            return Ok(PathBuf::from(appdata).join("upkeep"));
        }
    }
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("upkeep"));
    }
    match env::var_os("HOME") {
        Some(home) => Ok(PathBuf::from(home).join(".config").join("upkeep")),
        None => bail!("cannot resolve home directory (HOME is not set)"),
    }
}

pub fn paths() -> Result<Paths> {
    let home = upkeep_home()?;
    Ok(Paths {
        config: home.join("config.toml"),
        status: home.join("update-status.json"),
        logs: home.join("logs"),
    })
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn home_prefers_xdg_config_home() {
        let td = tempfile::tempdir().unwrap();
        let prev = env::var_os("XDG_CONFIG_HOME");
        unsafe { env::set_var("XDG_CONFIG_HOME", td.path()) };

        let p = paths().unwrap();
        assert_eq!(p.config, td.path().join("upkeep").join("config.toml"));
        assert_eq!(p.status, td.path().join("upkeep").join("update-status.json"));

        match prev {
            Some(v) => unsafe { env::set_var("XDG_CONFIG_HOME", v) },
            None => unsafe { env::remove_var("XDG_CONFIG_HOME") },
        }
    }

    #[test]
    #[serial]
    fn home_falls_back_to_dot_config() {
        let prev = env::var_os("XDG_CONFIG_HOME");
        unsafe { env::remove_var("XDG_CONFIG_HOME") };

        let home = upkeep_home().unwrap();
        assert!(home.ends_with(".config/upkeep"));

        if let Some(v) = prev {
            unsafe { env::set_var("XDG_CONFIG_HOME", v) };
        }
    }
}
