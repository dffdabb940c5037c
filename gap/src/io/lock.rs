//! Exclusive advisory lock around promote-and-record.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

/// Held for the lifetime of one approval; released on drop.
#[derive(Debug)]
pub struct GateLock {
    file: File,
    path: PathBuf,
}

impl GateLock {
    /// Block until the lock at `path` is acquired.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("open lock {}", path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("acquire lock {}", path.display()))?;
        debug!(path = %path.display(), "gate lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for GateLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release gate lock");
        } else {
            debug!(path = %self.path.display(), "gate lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".gap/gate.lock");
        let guard = GateLock::acquire(&path).expect("acquire");

        let probe = OpenOptions::new().write(true).open(&path).expect("probe");
        assert!(FileExt::try_lock_exclusive(&probe).is_err());

        drop(guard);
        assert!(FileExt::try_lock_exclusive(&probe).is_ok());
        FileExt::unlock(&probe).expect("unlock probe");
    }
}
