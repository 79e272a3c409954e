use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fs4::tokio::AsyncFileExt;
use tokio::fs::{File, OpenOptions};
use tracing::info;

const LOCK_FILE: &str = "punchclock.lock";

/// Exclusive claim on an application directory, so two daemons never write the same database.
/// Released when dropped.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub async fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .await
            .with_context(|| format!("Can't open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(_) => (),
            Err(e) => bail!(
                "Another instance is already running in {} ({e})",
                dir.display()
            ),
        }

        info!("Acquired {}", path.display());
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::InstanceLock;

    #[tokio::test]
    async fn test_second_instance_is_refused() -> Result<()> {
        let dir = tempdir()?;
        let lock = InstanceLock::acquire(dir.path()).await?;
        assert!(lock.path().exists());
        assert!(InstanceLock::acquire(dir.path()).await.is_err());

        drop(lock);
        InstanceLock::acquire(dir.path()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_directory() -> Result<()> {
        let dir = tempdir()?;
        assert!(InstanceLock::acquire(&dir.path().join("missing")).await.is_err());
        Ok(())
    }
}
