//! Append-Only Log Store
//!
//! Every `put` appends one record to a file and then updates an in-memory
//! index; `get` reads only the index. On open the whole file is replayed,
//! so the latest record for each key wins.
//!
//! ## Record Format
//!
//! ```text
//! ┌────────────┬──────────────┬──────────┬────────────┐
//! │ key_len u32│ value_len u32│ key bytes│ value bytes│
//! └────────────┴──────────────┴──────────┴────────────┘
//!    big-endian     big-endian
//! ```
//!
//! A record cut short by a crash is detected during replay; the file is
//! truncated back to the last complete record. A failed append is rolled
//! back the same way, and any bytes past the last complete record are cut
//! off before the next append, so an acknowledged record always starts on
//! a record boundary.

use crate::store::memory::MemoryStore;
use crate::store::{Store, StoreError, StoreResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Size of the fixed record header.
const HEADER_LEN: usize = 8;

/// The log file plus the offset just past its last complete record.
#[derive(Debug)]
struct LogFile {
    file: File,
    end: u64,
}

impl LogFile {
    /// Appends one record. On failure the file is cut back to `end`.
    fn append(&mut self, record: &[u8], sync: bool) -> io::Result<()> {
        if self.file.metadata()?.len() != self.end {
            warn!(end = self.end, "Discarding bytes past the last complete record");
            self.file.set_len(self.end)?;
        }

        let result = self.file.write_all(record).and_then(|()| {
            if sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => {
                self.end += record.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.file.set_len(self.end) {
                    warn!(error = %rollback, "Failed to roll back partial append");
                }
                Err(e)
            }
        }
    }
}

/// A persistent store backed by an append-only file.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    /// Appends and the index update that follows them happen under this
    /// lock, so the index always matches the order of the log.
    file: Mutex<LogFile>,
    index: MemoryStore,
    sync_writes: bool,
}

impl LogStore {
    /// Opens (or creates) the log at `path` and replays it.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let index = MemoryStore::new();
        let (records, valid_len) = replay(&raw, &index);
        if valid_len < raw.len() {
            warn!(
                path = %path.display(),
                discarded = raw.len() - valid_len,
                "Truncating incomplete record at end of log"
            );
            file.set_len(valid_len as u64)?;
        }

        info!(path = %path.display(), records, keys = index.len(), "Log store opened");

        Ok(Self {
            path,
            file: Mutex::new(LogFile {
                file,
                end: valid_len as u64,
            }),
            index,
            sync_writes: false,
        })
    }

    /// Flush every append to stable storage before acknowledging it.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct keys.
    pub fn len(&self) -> u64 {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Store for LogStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        Ok(self.index.read(key))
    }

    fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()> {
        let record = encode_record(&key, &value)?;

        let mut log = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        log.append(&record, self.sync_writes)?;
        self.index.write(key, value);
        Ok(())
    }
}

fn encode_record(key: &[u8], value: &[u8]) -> StoreResult<BytesMut> {
    let key_len = u32::try_from(key.len()).map_err(|_| StoreError::TooLarge(key.len()))?;
    let value_len = u32::try_from(value.len()).map_err(|_| StoreError::TooLarge(value.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + key.len() + value.len());
    buf.put_u32(key_len);
    buf.put_u32(value_len);
    buf.put_slice(key);
    buf.put_slice(value);
    Ok(buf)
}

/// Replays `raw` into `index`. Returns the number of records applied and
/// the byte length of the valid prefix.
fn replay(raw: &[u8], index: &MemoryStore) -> (usize, usize) {
    let mut cursor = raw;
    let mut records = 0;
    let mut valid_len = 0;

    while cursor.len() >= HEADER_LEN {
        let mut header = &cursor[..HEADER_LEN];
        let key_len = header.get_u32() as usize;
        let value_len = header.get_u32() as usize;
        let total = HEADER_LEN + key_len + value_len;
        if cursor.len() < total {
            break;
        }

        let key = Bytes::copy_from_slice(&cursor[HEADER_LEN..HEADER_LEN + key_len]);
        let value = Bytes::copy_from_slice(&cursor[HEADER_LEN + key_len..total]);
        index.write(key, value);

        cursor.advance(total);
        valid_len += total;
        records += 1;
    }

    (records, valid_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.log");

        {
            let store = LogStore::open(&path).unwrap();
            store.put(Bytes::from("a"), Bytes::from("1")).unwrap();
            store.put(Bytes::from("b"), Bytes::from("2")).unwrap();
            store.put(Bytes::from("a"), Bytes::from("3")).unwrap();
            assert_eq!(store.get(b"a").unwrap(), Some(Bytes::from("3")));
        }

        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b"a").unwrap(), Some(Bytes::from("3")));
        assert_eq!(store.get(b"b").unwrap(), Some(Bytes::from("2")));
        assert_eq!(store.get(b"c").unwrap(), None);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.log");

        {
            let store = LogStore::open(&path).unwrap().with_sync_writes(true);
            store.put(Bytes::from("keep"), Bytes::from("me")).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();

        // Half a record: header promises more bytes than follow
        let mut partial = encode_record(b"lost", b"value").unwrap();
        partial.truncate(HEADER_LEN + 2);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial).unwrap();
        drop(file);

        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.get(b"keep").unwrap(), Some(Bytes::from("me")));
        assert_eq!(store.get(b"lost").unwrap(), None);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        // Appends after recovery land on a clean boundary
        store.put(Bytes::from("next"), Bytes::from("ok")).unwrap();
        drop(store);
        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.get(b"next").unwrap(), Some(Bytes::from("ok")));
    }

    #[test]
    fn test_stray_tail_cut_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.log");

        let store = LogStore::open(&path).unwrap();
        store.put(Bytes::from("keep"), Bytes::from("me")).unwrap();

        // Leftover of an append that failed halfway
        let mut partial = encode_record(b"lost", b"value").unwrap();
        partial.truncate(10);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial).unwrap();
        drop(file);

        store.put(Bytes::from("next"), Bytes::from("ok")).unwrap();
        drop(store);

        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b"keep").unwrap(), Some(Bytes::from("me")));
        assert_eq!(store.get(b"next").unwrap(), Some(Bytes::from("ok")));
        assert_eq!(store.get(b"lost").unwrap(), None);
    }

    #[test]
    fn test_empty_values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.log");
        {
            let store = LogStore::open(&path).unwrap();
            store.put(Bytes::from("empty"), Bytes::new()).unwrap();
        }
        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.get(b"empty").unwrap(), Some(Bytes::new()));
    }
}
