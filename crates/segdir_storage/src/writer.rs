//! Append-only view over the segments of a storage location.

use crate::error::{StorageError, StorageResult};
use crate::lock::{self, ExclusivityLock, LockHandle};
use crate::reader::SegmentReader;
use crate::segment::SegmentFiles;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sequential appends over segment files.
///
/// Implemented by [`SegmentWriter`]; other backends can provide their own.
pub trait DataWriter: Send {
    /// Appends `data` to the current segment.
    ///
    /// Returns `(segment, offset)` where the bytes start.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be written. A partially written
    /// record is rolled back before the next operation proceeds.
    fn append(&mut self, data: &[u8]) -> StorageResult<(u64, u64)>;

    /// Publishes the next segment and directs subsequent appends to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the current segment cannot be synced or the new
    /// segment cannot be created.
    fn rollover(&mut self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Flush`] if the sync fails. A failed sync
    /// leaves the durability of earlier bytes unknown, so every later call
    /// fails with `Flush` as well.
    fn sync(&mut self) -> StorageResult<()>;

    /// Syncs outstanding bytes, then releases the writer lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Flush`] if the sync fails; the lock stays held
    /// until the writer is dropped and a later `close` fails the same way.
    fn close(&mut self) -> StorageResult<()>;
}

/// File operations the writer performs on segment contents.
pub(crate) trait SegmentIo: Send + Sync + fmt::Debug {
    /// Writes all of `data` at `offset`.
    fn write_all_at(&self, file: &File, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Flushes file contents to stable storage.
    fn sync_data(&self, file: &File) -> io::Result<()>;

    /// Sets the file length.
    fn set_len(&self, file: &File, len: u64) -> io::Result<()>;
}

/// Segment I/O straight against the file system.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FileIo;

impl SegmentIo for FileIo {
    fn write_all_at(&self, mut file: &File, offset: u64, data: &[u8]) -> io::Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    fn sync_data(&self, file: &File) -> io::Result<()> {
        file.sync_data()
    }

    fn set_len(&self, file: &File, len: u64) -> io::Result<()> {
        file.set_len(len)
    }
}

#[derive(Debug)]
struct ActiveSegment {
    index: u64,
    file: File,
    len: u64,
}

/// File-backed segment writer.
///
/// Holds the location's writer lock from [`open`](Self::open) until
/// [`close`](DataWriter::close) or drop. Appends go straight to the file
/// without user-space buffering, so they are visible to the paired reader as
/// soon as [`append`](DataWriter::append) returns; durability comes from
/// [`sync`](DataWriter::sync) and `close`.
///
/// # Example
///
/// ```no_run
/// use segdir_storage::{dir, CachePolicy, DataReader, DataWriter, SegmentReader, SegmentWriter};
///
/// let location = dir::ensure("/var/lib/env").unwrap();
/// let reader = SegmentReader::open(location, CachePolicy::buffered());
/// let mut writer = SegmentWriter::open(&reader, Some(1)).unwrap();
///
/// let (segment, offset) = writer.append(b"record").unwrap();
/// assert_eq!(reader.read_at(segment, offset, 6).unwrap(), b"record");
/// writer.close().unwrap();
/// ```
#[derive(Debug)]
pub struct SegmentWriter {
    reader: SegmentReader,
    lock: LockHandle,
    active: Option<ActiveSegment>,
    max_segment_size: Option<u64>,
    /// Bytes written since the last successful sync.
    dirty: bool,
    /// Length to cut the active segment back to after a failed append.
    pending_rollback: Option<u64>,
    /// Set once a sync has failed; a retried fsync may report success for
    /// pages the kernel already dropped.
    poisoned: bool,
    closed: bool,
    io: Arc<dyn SegmentIo>,
}

impl SegmentWriter {
    /// Opens a writer sharing segment state with `reader`.
    ///
    /// Acquires the location's writer lock, removes temporaries left by an
    /// interrupted rollover and resumes appending to the highest segment.
    ///
    /// # Errors
    ///
    /// - [`StorageError::LockHeld`] if another writer owns the location
    /// - [`StorageError::LockIo`] if the lock cannot be established
    /// - [`StorageError::Io`] if the highest segment cannot be opened
    pub fn open(reader: &SegmentReader, lock_id: Option<i64>) -> StorageResult<Self> {
        let files = reader.files();
        let lock = ExclusivityLock::acquire(files.location(), lock_id)?;

        let stale = files.remove_stale_temps()?;
        if stale > 0 {
            warn!(count = stale, "removed unpublished segment files");
        }

        let active = match files.list()?.last() {
            Some(&index) => Some(open_active(files, index)?),
            None => None,
        };

        debug!(
            path = %files.location().path().display(),
            segment = ?active.as_ref().map(|a| a.index),
            "opened segment writer"
        );

        Ok(Self {
            reader: reader.clone(),
            lock,
            active,
            max_segment_size: None,
            dirty: false,
            pending_rollback: None,
            poisoned: false,
            closed: false,
            io: Arc::new(FileIo),
        })
    }

    /// Rolls over automatically once a segment would grow past `size` bytes.
    ///
    /// A record larger than `size` still lands in a segment of its own.
    #[must_use]
    pub fn with_max_segment_size(mut self, size: Option<u64>) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Routes segment writes, syncs and truncations through `io`.
    #[cfg(test)]
    pub(crate) fn with_segment_io(mut self, io: Arc<dyn SegmentIo>) -> Self {
        self.io = io;
        self
    }

    /// Returns the reader this writer is paired with.
    #[must_use]
    pub fn reader(&self) -> &SegmentReader {
        &self.reader
    }

    /// Returns the segment receiving appends, if any has been created.
    #[must_use]
    pub fn current_segment(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.index)
    }

    /// Returns the identifier recorded in the writer lock.
    #[must_use]
    pub fn lock_id(&self) -> Option<i64> {
        self.lock.lock_id()
    }

    /// Returns true once the writer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns true once a sync has failed.
    ///
    /// A poisoned writer refuses further mutations and cannot be closed; drop
    /// it to release the lock, then reopen to recover.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the holder metadata recorded in the lock marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be read.
    pub fn lock_info(&self) -> StorageResult<Option<String>> {
        lock::read_lock_info(self.files().location())
    }

    /// Deletes a segment that no longer receives appends.
    ///
    /// Waits for in-flight reads of the paired reader before deleting.
    ///
    /// # Errors
    ///
    /// - [`StorageError::OutOfRange`] if the segment does not exist
    /// - [`StorageError::Io`] if it is the active segment or cannot be removed
    pub fn remove_segment(&mut self, segment: u64) -> StorageResult<()> {
        self.ensure_open()?;
        if self.current_segment() == Some(segment) {
            return Err(invalid_input(format!(
                "cannot remove active segment {segment}"
            )));
        }

        let files = self.files();
        {
            let _gate = files.exclusive();
            files.evict(segment);
            match fs::remove_file(files.path_of(segment)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(SegmentFiles::out_of_range(segment, 0, 0, 0));
                }
                Err(e) => return Err(e.into()),
            }
        }
        files.location().sync()?;

        debug!(segment, "removed segment");
        Ok(())
    }

    /// Cuts `segment` back to `len` bytes, discarding a torn tail.
    ///
    /// # Errors
    ///
    /// - [`StorageError::OutOfRange`] if the segment does not exist
    /// - [`StorageError::Io`] if `len` exceeds the segment length
    pub fn truncate_segment(&mut self, segment: u64, len: u64) -> StorageResult<()> {
        self.ensure_open()?;
        self.settle_rollback()?;

        let files = self.reader.files().clone();
        let _gate = files.exclusive();

        if let Some(active) = self.active.as_mut().filter(|a| a.index == segment) {
            check_truncate(segment, len, active.len)?;
            self.io.set_len(&active.file, len)?;
            active.len = len;
            self.dirty = true;
        } else {
            let file = match OpenOptions::new().write(true).open(files.path_of(segment)) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(SegmentFiles::out_of_range(segment, len, 0, 0));
                }
                Err(e) => return Err(e.into()),
            };
            check_truncate(segment, len, file.metadata()?.len())?;
            self.io.set_len(&file, len)?;
            if let Err(e) = self.io.sync_data(&file) {
                return Err(self.flush_failed(e));
            }
        }

        debug!(segment, len, "truncated segment");
        Ok(())
    }

    fn files(&self) -> &SegmentFiles {
        self.reader.files()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::WriterClosed);
        }
        if self.poisoned {
            return Err(StorageError::Flush(io::Error::new(
                io::ErrorKind::Other,
                "an earlier sync failed; unsynced bytes may be lost",
            )));
        }
        Ok(())
    }

    fn flush_failed(&mut self, e: io::Error) -> StorageError {
        self.poisoned = true;
        warn!(error = %e, "segment sync failed, writer poisoned");
        StorageError::Flush(e)
    }

    /// Retries the rollback of a failed append. Until it succeeds every
    /// mutating operation fails with the same error.
    fn settle_rollback(&mut self) -> StorageResult<()> {
        let (Some(len), Some(active)) = (self.pending_rollback, self.active.as_mut()) else {
            return Ok(());
        };
        self.io.set_len(&active.file, len)?;
        active.len = len;
        self.pending_rollback = None;
        debug!(segment = active.index, len, "rolled back partial append");
        Ok(())
    }

    fn next_index(&self) -> StorageResult<u64> {
        if let Some(active) = &self.active {
            return Ok(active.index + 1);
        }
        Ok(self.files().list()?.last().map_or(0, |&index| index + 1))
    }

    fn needs_rollover(&self, incoming: usize) -> bool {
        match (&self.active, self.max_segment_size) {
            (None, _) => true,
            (Some(active), Some(max)) => {
                incoming > 0
                    && active.len > 0
                    && active.len.saturating_add(incoming as u64) > max
            }
            (Some(_), None) => false,
        }
    }
}

impl DataWriter for SegmentWriter {
    fn append(&mut self, data: &[u8]) -> StorageResult<(u64, u64)> {
        self.ensure_open()?;
        self.settle_rollback()?;

        if self.needs_rollover(data.len()) {
            self.rollover()?;
        }

        let Some(active) = self.active.as_mut() else {
            return Err(invalid_input("no active segment after rollover".to_string()));
        };

        let offset = active.len;
        if data.is_empty() {
            return Ok((active.index, offset));
        }

        if let Err(e) = self.io.write_all_at(&active.file, offset, data) {
            self.pending_rollback = Some(offset);
            if let Err(rollback) = self.settle_rollback() {
                warn!(error = %rollback, "partial append not rolled back yet");
            }
            return Err(e.into());
        }

        active.len += data.len() as u64;
        self.dirty = true;
        Ok((active.index, offset))
    }

    fn rollover(&mut self) -> StorageResult<u64> {
        self.ensure_open()?;
        self.settle_rollback()?;
        self.sync()?;

        let index = self.next_index()?;
        let files = self.reader.files();
        let temp = files.temp_path_of(index);
        let path = files.path_of(index);

        // Publish by rename so readers never see a half-created segment.
        File::create(&temp)?.sync_all()?;
        fs::rename(&temp, &path)?;
        files.location().sync()?;

        self.active = Some(open_active(files, index)?);
        debug!(segment = index, "published segment");
        Ok(index)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        if !self.dirty {
            return Ok(());
        }
        if let Some(active) = &self.active {
            if let Err(e) = self.io.sync_data(&active.file) {
                return Err(self.flush_failed(e));
            }
        }
        self.dirty = false;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }

        self.ensure_open()?;
        self.settle_rollback()?;
        self.sync()?;
        self.lock.release()?;
        self.active = None;
        self.closed = true;

        info!(
            path = %self.files().location().path().display(),
            "closed segment writer"
        );
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if self.closed || self.poisoned {
            return;
        }
        if let Err(e) = self.settle_rollback().and_then(|()| self.sync()) {
            warn!(error = %e, "segment writer dropped with unsynced bytes");
        }
    }
}

fn open_active(files: &SegmentFiles, index: u64) -> StorageResult<ActiveSegment> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(files.path_of(index))?;
    let len = file.metadata()?.len();
    Ok(ActiveSegment { index, file, len })
}

fn check_truncate(segment: u64, len: u64, size: u64) -> StorageResult<()> {
    if len > size {
        return Err(invalid_input(format!(
            "cannot truncate segment {segment} to {len} bytes, it holds {size}"
        )));
    }
    Ok(())
}

fn invalid_input(message: String) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::InvalidInput, message))
}
