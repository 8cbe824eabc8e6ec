//! Exclusive build lock
//!
//! A build of an index file holds `<target>.lock`: the file is created with
//! `create_new` so a second builder fails immediately, and an advisory exclusive lock
//! is taken on it for the duration. Committing renames the lock file over the target,
//! dropping without committing removes it.

use crate::artifacts::format_error::FormatError;
use file_guard::{FileGuard, Lock};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Lockfile {
    target: PathBuf,
    lock_path: PathBuf,
    guard: Option<FileGuard<Box<File>>>,
}

impl Lockfile {
    /// Take the lock for `target`
    pub fn hold(target: &Path) -> Result<Self, FormatError> {
        let lock_path = Self::lock_path_for(target);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| FormatError::io(parent, err))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => FormatError::LockHeld {
                    path: lock_path.clone(),
                },
                _ => FormatError::io(&lock_path, err),
            })?;

        let guard = match file_guard::try_lock(Box::new(file), Lock::Exclusive, 0, 1) {
            Ok(guard) => guard,
            Err(err) => {
                // the file is ours, so it must not outlive the failed attempt
                let _ = std::fs::remove_file(&lock_path);
                return Err(match err.kind() {
                    ErrorKind::WouldBlock => FormatError::LockHeld { path: lock_path },
                    _ => FormatError::io(&lock_path, err),
                });
            }
        };

        Ok(Lockfile {
            target: target.to_path_buf(),
            lock_path,
            guard: Some(guard),
        })
    }

    pub fn lock_path_for(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Handle to the lock file for writing the new content
    pub fn file(&self) -> Result<&File, FormatError> {
        self.guard
            .as_ref()
            .map(|guard| &***guard)
            .ok_or_else(|| FormatError::corrupt("lock file already released"))
    }

    pub fn write_all(&self, bytes: &[u8]) -> Result<(), FormatError> {
        let mut file = self.file()?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|err| FormatError::io(&self.lock_path, err))
    }

    /// Publish the lock file's content at the target path
    pub fn commit(mut self) -> Result<(), FormatError> {
        if let Some(guard) = self.guard.take() {
            guard
                .sync_all()
                .map_err(|err| FormatError::io(&self.lock_path, err))?;
        }

        std::fs::rename(&self.lock_path, &self.target).map_err(|err| {
            let _ = std::fs::remove_file(&self.lock_path);
            FormatError::io(&self.target, err)
        })
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
