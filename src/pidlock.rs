//! Persisted state: a PID lock file preventing a second daemon instance
//! from starting. `daemonize` already takes a non-blocking advisory lock on
//! its PID file when daemonizing; this module covers the same guarantee for
//! foreground runs, using `fs2`'s `flock(2)` wrapper.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_PID_FILE: &str = "vnddvpnd.pid";

/// A held, non-blocking advisory lock on a PID file. Dropping it releases
/// the lock and leaves the file in place (matching flock's release-on-close
/// semantics; nothing unlinks the file on drop, mirroring common daemon
/// practice of leaving the last PID visible).
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Acquires the lock, writing the current PID into the file on
    /// success. If another process already holds the lock, this returns
    /// `InvalidArgument` (the caller treats this as "second instance,
    /// exit 1").
    pub fn acquire(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| EngineError::InvalidArgument(format!("open {}: {}", path.display(), e)))?;

        file.try_lock_exclusive().map_err(|_| {
            EngineError::InvalidArgument(format!(
                "another instance already holds {}",
                path.display()
            ))
        })?;

        file.set_len(0)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        write!(file, "{}", std::process::id())
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_file_fails() {
        let dir = std::env::temp_dir().join(format!("resilinet-pidlock-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&dir);
        let first = PidLock::acquire(&dir).unwrap();
        let err = PidLock::acquire(&dir).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        drop(first);
        let _ = std::fs::remove_file(&dir);
    }
}
