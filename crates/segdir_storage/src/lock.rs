//! Single-writer exclusivity lock.
//!
//! The writer takes an OS advisory lock on `<location>/xd.lck`. The lock
//! conflicts with any other handle on the same file, in this process or
//! another, and the OS drops it if the owning process dies. After acquiring,
//! the holder records who it is in the marker so a contender can report it.

use crate::dir::StorageLocation;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Name of the lock marker within a storage location.
pub const LOCK_FILE: &str = "xd.lck";

/// Acquires writer locks on storage locations.
pub struct ExclusivityLock;

impl ExclusivityLock {
    /// Acquires the writer lock for `location`.
    ///
    /// Never blocks and never retries: a contended lock fails immediately.
    ///
    /// # Errors
    ///
    /// - [`StorageError::LockHeld`] if any live handle holds the lock,
    ///   whatever its `lock_id`
    /// - [`StorageError::LockIo`] if the marker cannot be opened, locked or
    ///   written
    pub fn acquire(location: &StorageLocation, lock_id: Option<i64>) -> StorageResult<LockHandle> {
        let path = location.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::lock_io(&path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                let holder = read_lock_info(location).ok().flatten();
                return Err(StorageError::lock_held(location.path(), holder));
            }
            return Err(StorageError::lock_io(&path, e));
        }

        let info = describe_holder(lock_id);
        if let Err(e) = write_info(&mut file, &info) {
            // Dropping the handle releases the lock again.
            let _ = FileExt::unlock(&file);
            return Err(StorageError::lock_io(&path, e));
        }

        info!(path = %location.path().display(), ?lock_id, "acquired writer lock");

        Ok(LockHandle {
            path,
            lock_id,
            file: Some(file),
        })
    }

    /// Releases `handle`. Releasing an already released handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockIo`] if the OS refuses to unlock.
    pub fn release(handle: &mut LockHandle) -> StorageResult<()> {
        handle.release()
    }
}

/// A held writer lock. Dropping the handle releases the lock.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    lock_id: Option<i64>,
    file: Option<File>,
}

impl LockHandle {
    /// Returns the lock marker path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the identifier recorded for this holder.
    #[must_use]
    pub fn lock_id(&self) -> Option<i64> {
        self.lock_id
    }

    /// Returns true while the lock is held.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Releases the lock. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockIo`] if the OS refuses to unlock. The
    /// handle is still closed, which releases the lock.
    pub fn release(&mut self) -> StorageResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let result = FileExt::unlock(&file).map_err(|e| StorageError::lock_io(&self.path, e));
        drop(file);
        info!(path = %self.path.display(), lock_id = ?self.lock_id, "released writer lock");
        result
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "failed to release writer lock");
        }
    }
}

/// Reads the holder metadata recorded in the lock marker.
///
/// Returns `None` if there is no marker or it is empty.
///
/// # Errors
///
/// Returns an error if the marker exists but cannot be read.
pub fn read_lock_info(location: &StorageLocation) -> StorageResult<Option<String>> {
    let path = location.join(LOCK_FILE);
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut info = String::new();
    file.read_to_string(&mut info)?;
    if info.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(info))
}

fn describe_holder(lock_id: Option<i64>) -> String {
    let acquired_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let lock_id = lock_id.map_or_else(|| "unset".to_string(), |id| id.to_string());
    format!(
        "lock_id={lock_id}\npid={}\nacquired_at={acquired_at}\n",
        std::process::id()
    )
}

fn write_info(file: &mut File, info: &str) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(info.as_bytes())?;
    file.sync_all()
}
