use std::{env, io, path::PathBuf};

use anyhow::{Context, Result};

const APPLICATION_DIR: &str = "punchclock";

/// Default directory for logs and the instance lock, created if missing.
pub fn create_application_default_path() -> Result<PathBuf> {
    let mut path = base_state_dir()?;
    path.push(APPLICATION_DIR);

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v).with_context(|| format!("Can't create {}", path.display())),
    }
}

#[cfg(windows)]
fn base_state_dir() -> Result<PathBuf> {
    env::var("APPDATA")
        .map(PathBuf::from)
        .context("APPDATA should be present on Windows")
}

#[cfg(not(windows))]
fn base_state_dir() -> Result<PathBuf> {
    env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .context("Couldn't find neither XDG_STATE_HOME nor HOME")
}
