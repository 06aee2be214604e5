//! Lock file guarding the inventory while a job run reads and rewrites it.

use std::fs::OpenOptions;
use std::io::ErrorKind;

use crate::error::FileError;

pub struct LockedFile {
    /// Path to the lock file.
    lock_path: String,
    /// The file this lock protects.
    file_path: String,
}

impl LockedFile {
    /// Wait until `<file_path>.lock` can be created exclusively.
    pub async fn acquire(file_path: &str) -> Result<Self, FileError> {
        let lock_path = format!("{}.lock", file_path);
        let mut waited = false;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !waited {
                        tracing::info!(lock = %lock_path, "waiting for lock");
                        waited = true;
                    }
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
                Err(source) => {
                    return Err(FileError::Io {
                        path: lock_path,
                        source,
                    })
                }
            }
        }
        Ok(Self {
            lock_path,
            file_path: file_path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.file_path
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            tracing::error!(lock = %self.lock_path, "failed to remove lock file: {}", e);
        }
    }
}
