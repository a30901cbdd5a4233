//! Scratch directory locking
//!
//! A build holds an advisory exclusive `flock` on `<scratch>.lock` for as
//! long as it uses the scratch directory. The lock file lives next to the
//! directory so removing the directory never drops the lock.

use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Exclusive ownership of one scratch directory, released on drop
#[derive(Debug)]
pub struct ScratchLock {
    /// The lock file handle (kept open to maintain lock)
    file: File,
    /// Path to the lock file
    path: PathBuf,
}

impl ScratchLock {
    /// Lock file path for a scratch directory
    pub fn lock_path(scratch: &Path) -> PathBuf {
        let mut name = scratch
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        scratch.with_file_name(name)
    }

    /// Take the lock without waiting; a held lock is [`BuildError::ScratchBusy`]
    pub fn try_acquire(scratch: &Path) -> Result<Self, BuildError> {
        let path = Self::lock_path(scratch);
        let io_err = |e: std::io::Error| BuildError::Lock {
            path: path.clone(),
            error: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = File::create(&path).map_err(io_err)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired scratch lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(BuildError::ScratchBusy {
                    path: scratch.to_path_buf(),
                })
            }
            Err(e) => Err(io_err(e)),
        }
    }

    /// Path to the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::debug!("Released scratch lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_sits_beside_scratch() {
        let path = ScratchLock::lock_path(Path::new("/tmp/build/emacs-24.3-abcd1234"));
        assert_eq!(path, PathBuf::from("/tmp/build/emacs-24.3-abcd1234.lock"));
    }

    #[test]
    fn test_second_lock_is_busy_until_released() {
        let temp = TempDir::new().unwrap();
        let scratch = temp.path().join("demo-1.0-0000");

        let first = ScratchLock::try_acquire(&scratch).unwrap();
        assert!(first.path().exists());

        match ScratchLock::try_acquire(&scratch) {
            Err(BuildError::ScratchBusy { path }) => assert_eq!(path, scratch),
            other => panic!("expected ScratchBusy, got {other:?}"),
        }

        drop(first);
        assert!(ScratchLock::try_acquire(&scratch).is_ok());
    }

    #[test]
    fn test_unusable_lock_location_is_a_lock_error() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("build");
        std::fs::write(&blocker, "not a directory").unwrap();

        match ScratchLock::try_acquire(&blocker.join("demo-1.0-0000")) {
            Err(BuildError::Lock { path, .. }) => assert_eq!(path, blocker.join("demo-1.0-0000.lock")),
            other => panic!("expected Lock, got {other:?}"),
        }
    }
}
