//! Bucket directory management.
//!
//! A bucket is a directory holding one key-value store:
//!
//! ```text
//! <bucket>/
//! ├─ LOCK              # Advisory lock for single-handle access
//! ├─ wal.log           # Write-ahead log
//! └─ wal.log.compact   # Compaction output, present only mid-pass
//! ```
//!
//! The LOCK file ensures only one handle can open the bucket at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const COMPACT_TEMP_FILE: &str = "wal.log.compact";

/// Owns a bucket directory and its exclusive lock.
///
/// The lock is released when the `BucketDir` is dropped.
#[derive(Debug)]
pub struct BucketDir {
    path: PathBuf,
    /// Held for the lifetime of the handle.
    _lock_file: File,
}

impl BucketDir {
    /// Opens or creates a bucket directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Open`] if the directory is missing and
    ///   `create_if_missing` is false, is not a directory, or cannot be created
    /// - [`CoreError::Locked`] if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::open(
                    path,
                    io::Error::new(io::ErrorKind::NotFound, "bucket directory does not exist"),
                ));
            }
            fs::create_dir_all(path).map_err(|e| CoreError::open(path, e))?;
        }

        if !path.is_dir() {
            return Err(CoreError::open(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path is not a directory"),
            ));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| CoreError::open(&lock_path, e))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the bucket directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the WAL file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Returns the path compaction writes its output to.
    #[must_use]
    pub fn compact_temp_path(&self) -> PathBuf {
        self.path.join(COMPACT_TEMP_FILE)
    }

    /// Deletes a compaction output left behind by an interrupted pass.
    ///
    /// Returns `true` if a file was removed. The WAL is untouched either way:
    /// an interrupted pass never renamed its output.
    pub fn remove_stray_temp(&self) -> CoreResult<bool> {
        let temp = self.compact_temp_path();
        match fs::remove_file(&temp) {
            Ok(()) => {
                warn!(path = %temp.display(), "removed leftover compaction file");
                self.sync_directory()?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replaces the WAL with the compaction output.
    ///
    /// The rename is durable only after [`Self::sync_directory`].
    pub fn install_compacted(&self) -> CoreResult<()> {
        fs::rename(self.compact_temp_path(), self.wal_path())?;
        Ok(())
    }

    /// Syncs directory entries so creates, renames, and deletes are durable.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    /// Directory fsync is not available on Windows; NTFS journals metadata.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
