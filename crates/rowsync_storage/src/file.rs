//! Journal-file storage backend for persistent storage.

use crate::backend::{KeyRange, Precondition, StorageBackend, Versioned};
use crate::error::{StorageError, StorageResult};
use crate::memory::Keyspace;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Length prefix size of a journal frame.
const FRAME_HEADER: usize = 4;

/// One journal frame: a put (with value) or a delete (without).
#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    space: String,
    key: String,
    version: u64,
    value: Option<Vec<u8>>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    records: Keyspace,
}

/// A file-based storage backend.
///
/// Every put and delete is appended to a journal file as a length-prefixed
/// CBOR frame and applied to an in-memory index. Opening the backend replays
/// the journal. A torn frame at the tail (crash mid-append) is truncated
/// away on open.
///
/// # Durability
///
/// With `sync_on_write` enabled (the default) each write calls
/// `File::sync_data()` before returning.
///
/// # Thread Safety
///
/// The journal file is locked exclusively for the lifetime of the backend,
/// so two processes cannot interleave frames. Within the process, internal
/// locking serializes writers.
///
/// # Example
///
/// ```no_run
/// use rowsync_storage::{FileBackend, Precondition, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("rowsync.journal")).unwrap();
/// backend.put("tables", "t1", b"entry", Precondition::Any).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
    sync_on_write: bool,
}

impl FileBackend {
    /// Opens or creates a journal at the given path and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is locked by another
    /// process, or contains a corrupted frame before its tail.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut bytes)?;

        let (records, valid_len) = replay(&bytes)?;
        if valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                discarded = bytes.len() - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, records }),
            sync_on_write: true,
        })
    }

    /// Opens or creates a journal, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Disables the per-write `sync_data` call.
    #[must_use]
    pub fn without_sync_on_write(mut self) -> Self {
        self.sync_on_write = false;
        self
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, inner: &mut Inner, record: &JournalRecord) -> StorageResult<()> {
        let mut body = Vec::new();
        ciborium::ser::into_writer(record, &mut body)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let len = u32::try_from(body.len())
            .map_err(|_| StorageError::Encoding("journal frame too large".into()))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);

        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(&frame)?;
        if self.sync_on_write {
            inner.file.sync_data()?;
        }
        Ok(())
    }
}

/// Replays journal frames. Returns the index and the length of the valid
/// prefix of `bytes`.
fn replay(bytes: &[u8]) -> StorageResult<(Keyspace, usize)> {
    let mut records = Keyspace::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        if bytes.len() - offset < FRAME_HEADER {
            break;
        }
        let mut header = [0u8; FRAME_HEADER];
        header.copy_from_slice(&bytes[offset..offset + FRAME_HEADER]);
        let len = u32::from_be_bytes(header) as usize;
        let body_start = offset + FRAME_HEADER;
        let Some(body_end) = body_start.checked_add(len) else {
            break;
        };
        if body_end > bytes.len() {
            break;
        }

        let record: JournalRecord = match ciborium::de::from_reader(&bytes[body_start..body_end]) {
            Ok(record) => record,
            // A bad frame at the very end is a torn write; anywhere else it is corruption.
            Err(_) if body_end == bytes.len() => break,
            Err(e) => {
                return Err(StorageError::Corrupted(format!(
                    "journal frame at offset {offset}: {e}"
                )))
            }
        };

        match record.value {
            Some(value) => records.insert(
                &record.space,
                &record.key,
                Versioned {
                    version: record.version,
                    value,
                },
            ),
            None => {
                records.remove(&record.space, &record.key);
            }
        }
        offset = body_end;
    }

    Ok((records, offset))
}

impl StorageBackend for FileBackend {
    fn get(&self, space: &str, key: &str) -> StorageResult<Option<Versioned>> {
        Ok(self.inner.lock().records.get(space, key))
    }

    fn put(
        &self,
        space: &str,
        key: &str,
        value: &[u8],
        precondition: Precondition,
    ) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let version = inner.records.next_version(space, key, precondition)?;
        let record = JournalRecord {
            space: space.to_string(),
            key: key.to_string(),
            version,
            value: Some(value.to_vec()),
        };
        self.append(&mut inner, &record)?;
        inner.records.insert(
            space,
            key,
            Versioned {
                version,
                value: value.to_vec(),
            },
        );
        Ok(version)
    }

    fn delete(&self, space: &str, key: &str) -> StorageResult<bool> {
        let mut inner = self.inner.lock();
        let Some(version) = inner.records.current_version(space, key) else {
            return Ok(false);
        };
        let record = JournalRecord {
            space: space.to_string(),
            key: key.to_string(),
            version,
            value: None,
        };
        self.append(&mut inner, &record)?;
        Ok(inner.records.remove(space, key))
    }

    fn scan(
        &self,
        space: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> StorageResult<Vec<(String, Versioned)>> {
        Ok(self.inner.lock().records.scan(space, range, limit))
    }

    fn flush(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_put_and_get() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("j.log")).unwrap();

        backend.put("rows", "r1", b"hello", Precondition::Absent).unwrap();
        let stored = backend.get("rows", "r1").unwrap().unwrap();
        assert_eq!(stored.value, b"hello");
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.put("rows", "r1", b"one", Precondition::Any).unwrap();
            backend.put("rows", "r1", b"two", Precondition::Any).unwrap();
            backend.put("rows", "r2", b"gone", Precondition::Any).unwrap();
            backend.delete("rows", "r2").unwrap();
            backend.flush().unwrap();
        }

        {
            let backend = FileBackend::open(&path).unwrap();
            let stored = backend.get("rows", "r1").unwrap().unwrap();
            assert_eq!(stored.value, b"two");
            assert_eq!(stored.version, 2);
            assert!(backend.get("rows", "r2").unwrap().is_none());
        }
    }

    #[test]
    fn file_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.put("rows", "r1", b"kept", Precondition::Any).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0, 0, 0, 40, 1, 2, 3]).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("rows", "r1").unwrap().unwrap().value, b"kept");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn file_precondition_enforced() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("j.log")).unwrap();
        backend.put("s", "k", b"v", Precondition::Any).unwrap();

        let result = backend.put("s", "k", b"w", Precondition::Version(7));
        assert!(matches!(result, Err(StorageError::PreconditionFailed { .. })));
    }

    #[test]
    fn file_scan_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.log");
        {
            let backend = FileBackend::open(&path).unwrap().without_sync_on_write();
            for key in ["b", "a", "c"] {
                backend.put("s", key, b"", Precondition::Any).unwrap();
            }
        }
        let backend = FileBackend::open(&path).unwrap();
        let keys: Vec<_> = backend
            .scan("s", &KeyRange::all(), None)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("j.log");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }
}
