//! Directory-backed snapshot store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::SnapshotStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Advisory lock file guarding the directory against a second process.
const LOCK_FILE: &str = "LOCK";

/// Suffix used for temporary files during atomic writes.
const TEMP_SUFFIX: &str = ".tmp";

/// A snapshot store backed by a single directory.
///
/// Each blob is one file inside the directory. Writes use the
/// write-then-rename pattern for crash safety:
///
/// 1. Write to a temporary file
/// 2. Sync the temporary file to disk
/// 3. Rename the temporary file over the destination
/// 4. Fsync the directory so the metadata update is durable
///
/// # Locking
///
/// Opening a `DirStore` acquires an exclusive advisory lock on a `LOCK`
/// file inside the directory. A second process opening the same directory
/// fails with [`StorageError::Locked`]. The lock is released when the store
/// is dropped.
#[derive(Debug)]
pub struct DirStore {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DirStore {
    /// Opens or creates a directory store at the given path.
    ///
    /// The directory is created if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock,
    /// or an I/O error if the directory cannot be created or opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rejects names that would escape the directory or collide with
    /// bookkeeping files.
    fn check_name(name: &str) -> StorageResult<()> {
        let bad = name.is_empty()
            || name == LOCK_FILE
            || name.ends_with(TEMP_SUFFIX)
            || name.contains('/')
            || name.contains('\\');
        if bad {
            return Err(StorageError::invalid_name(name));
        }
        Ok(())
    }

    /// Syncs the directory so renames and creations are durable.
    #[cfg(unix)]
    fn sync_dir(&self) -> StorageResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> StorageResult<()> {
        // NTFS journaling provides metadata durability; directory fsync is
        // not supported on Windows.
        Ok(())
    }
}

impl SnapshotStore for DirStore {
    fn read(&self, name: &str) -> StorageResult<Vec<u8>> {
        Self::check_name(name)?;
        let path = self.path.join(name);
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        Self::check_name(name)?;
        let final_path = self.path.join(name);
        let temp_path = self.path.join(format!("{name}{TEMP_SUFFIX}"));

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        self.sync_dir()
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        Self::check_name(from)?;
        Self::check_name(to)?;
        let from_path = self.path.join(from);
        if !from_path.exists() {
            return Err(StorageError::not_found(from));
        }
        fs::rename(&from_path, self.path.join(to))?;
        self.sync_dir()
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Self::check_name(name)?;
        Ok(self.path.join(name).exists())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }
}
