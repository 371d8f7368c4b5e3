//! Key-value storage backing the chain and state keyspaces.
//!
//! The node stores everything in one physical key-value store partitioned by
//! key prefix (`chain/*`, `state/*`; no prefixes overlap). The store itself is
//! a capability: the in-memory implementation backs tests and ephemeral solo
//! runs, the file-backed one persists a snapshot across restarts.

use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

/// Store result type.
pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by a key-value store. Everything here is an internal
/// storage failure from the node's perspective.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// Underlying I/O failure.
    #[error("kvstore: io: {0}")]
    Io(#[from] io::Error),
}

/// An ordered batch of writes applied atomically.
#[derive(Debug, Default)]
pub struct Batch {
    writes: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write. Batch order is preserved by [`KvStore::write`], so a
    /// caller can sequence a well-known pointer key last.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.writes.push((key.into(), value.into()));
        self
    }

    /// Number of writes in the batch.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// The key-value store capability.
///
/// Implementations serialize writers; readers never block each other.
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Applies a batch, preserving its order.
    fn write(&self, batch: Batch) -> KvResult<()>;

    /// Returns a snapshot of all pairs under the given key prefix.
    fn scan_prefix(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Convenience for single writes.
pub fn put(store: &dyn KvStore, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> KvResult<()> {
    let mut batch = Batch::new();
    batch.put(key, value);
    store.write(batch)
}

/// An in-memory store: a BTreeMap under a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write(&self, batch: Batch) -> KvResult<()> {
        let mut map = self.map.write();
        for (key, value) in batch.writes {
            map.insert(key, value);
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// A file-backed store: the full map in memory, appended to a log file on
/// every write and compacted on open.
///
/// Record format: `len(key) u32-be, key, len(value) u32-be, value`. A torn
/// tail record is dropped on open, so a crash mid-write loses at most the
/// interrupted batch suffix; the repository sequences its head pointer last
/// to keep that loss safe.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: RwLock<FileStoreInner>,
}

#[derive(Debug)]
struct FileStoreInner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    log: fs::File,
}

impl FileStore {
    /// Opens the store at `path`, replaying the existing log.
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut map = BTreeMap::new();
        if path.exists() {
            let data = fs::read(&path)?;
            let mut offset = 0usize;
            while offset < data.len() {
                match read_record(&data, offset) {
                    Some((key, value, next)) => {
                        map.insert(key, value);
                        offset = next;
                    }
                    // torn tail record, drop it
                    None => break,
                }
            }
        }
        debug!(target: "db", path = %path.display(), entries = map.len(), "opened file store");
        let log = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, inner: RwLock::new(FileStoreInner { map, log }) })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_record(data: &[u8], offset: usize) -> Option<(Vec<u8>, Vec<u8>, usize)> {
    let read_chunk = |offset: usize| -> Option<(Vec<u8>, usize)> {
        let len_end = offset.checked_add(4)?;
        let len = u32::from_be_bytes(data.get(offset..len_end)?.try_into().ok()?) as usize;
        let end = len_end.checked_add(len)?;
        Some((data.get(len_end..end)?.to_vec(), end))
    };
    let (key, offset) = read_chunk(offset)?;
    let (value, offset) = read_chunk(offset)?;
    Some((key, value, offset))
}

fn write_record(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(self.inner.read().map.get(key).cloned())
    }

    fn write(&self, batch: Batch) -> KvResult<()> {
        let mut inner = self.inner.write();
        let mut encoded = Vec::new();
        for (key, value) in &batch.writes {
            write_record(&mut encoded, key, value);
        }
        inner.log.write_all(&encoded)?;
        inner.log.sync_data()?;
        for (key, value) in batch.writes {
            inner.map.insert(key, value);
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self.inner.read();
        Ok(inner
            .map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// A shared store handle.
pub type SharedStore = Arc<dyn KvStore>;
