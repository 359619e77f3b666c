//! Advisory exclusive file lock enforcing single-owner-of-file.

use fs2::FileExt;
use mv2s_core::{MvError, MvResult};
use std::fs::File;
use std::path::Path;

/// Holds an advisory exclusive lock on an owned file handle for as long as
/// it is alive. A dedicated handle (rather than borrowing the store's main
/// `FileBackend` handle) keeps the store actor free to move/own its backend
/// independently of the lock's lifetime.
pub struct ExclusiveLock {
    file: File,
}

impl ExclusiveLock {
    /// Open `path` and attempt to acquire an exclusive advisory lock on it
    /// without blocking. Fails with [`MvError::WriterBusy`] if another
    /// process already holds it.
    pub fn try_acquire(path: &Path) -> MvResult<Self> {
        let file = File::open(path)?;
        file.try_lock_exclusive().map_err(|_| MvError::WriterBusy)?;
        Ok(Self { file })
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn second_exclusive_acquire_fails_while_first_held() {
        let tmp = NamedTempFile::new().unwrap();
        let lock1 = ExclusiveLock::try_acquire(tmp.path()).unwrap();
        assert!(ExclusiveLock::try_acquire(tmp.path()).is_err());
        drop(lock1);
        assert!(ExclusiveLock::try_acquire(tmp.path()).is_ok());
    }
}
