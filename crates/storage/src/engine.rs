//! Embedded transactional key-value engine
//!
//! Opaque byte records live in named buckets inside a single database file.
//! All access goes through two transaction-scoped entry points:
//!
//! - [`Store::with_read`] - snapshot read, fails if the bucket does not exist
//! - [`Store::with_write`] - creates the bucket if needed, commits only when the
//!   closure succeeds and rolls back everything otherwise
//!
//! Write transactions are serialized by the engine (single writer); readers see
//! the last committed snapshot and never block on a writer.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted --open()--> Running --close()--> Stopped --open()--> Running
//! ```
//!
//! `open()` on a running store and `close()` on a store that is not running
//! are no-ops.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use redb::{Database, ReadOnlyTable, ReadableTable, Table, TableDefinition, TableError};
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use crate::error::StorageError;

/// Default permission bits for the database file (owner read/write)
pub const DEFAULT_FILE_MODE: u32 = 0o600;

type RawBytes = &'static [u8];

/// Where and how the database file is created
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreOptions {
    /// Database file path
    pub path: PathBuf,
    /// Unix permission bits applied to the file on open
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
}

fn default_file_mode() -> u32 {
    DEFAULT_FILE_MODE
}

impl StoreOptions {
    /// Options for `path` with the default file mode
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_mode: DEFAULT_FILE_MODE,
        }
    }

    /// Override the file permission bits
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }
}

/// Observable lifecycle state of a [`Store`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    NotStarted,
    Running,
    Stopped,
}

enum EngineState {
    NotStarted,
    Running(Arc<Database>),
    Stopped,
}

struct StoreInner {
    options: StoreOptions,
    state: Mutex<EngineState>,
    /// (bucket, key) -> lock serializing read-modify-write on that record
    key_locks: DashMap<(String, Vec<u8>), Arc<Mutex<()>>>,
}

/// Handle to the storage engine
///
/// Cheap to clone; clones share the open database and the per-key locks.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store handle without opening the database
    pub fn new(options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                options,
                state: Mutex::new(EngineState::NotStarted),
                key_locks: DashMap::new(),
            }),
        }
    }

    /// Create and open a store at `path` with default options
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self::new(StoreOptions::new(path));
        store.open()?;
        Ok(store)
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.inner.options.path
    }

    /// Current lifecycle state
    pub fn state(&self) -> StoreState {
        match &*self.inner.state.lock() {
            EngineState::NotStarted => StoreState::NotStarted,
            EngineState::Running(_) => StoreState::Running,
            EngineState::Stopped => StoreState::Stopped,
        }
    }

    /// Open the database file, creating it if needed
    ///
    /// Sets restrictive permissions on the file (Unix only).
    pub fn open(&self) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock();
        if matches!(*state, EngineState::Running(_)) {
            debug!(path = %self.path().display(), "Store already open");
            return Ok(());
        }

        let path = &self.inner.options.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path).map_err(engine)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(self.inner.options.file_mode))?;
        }

        *state = EngineState::Running(Arc::new(db));
        info!(
            path = %path.display(),
            file_mode = %format!("{:o}", self.inner.options.file_mode),
            "Opened certificate store"
        );
        Ok(())
    }

    /// Close the database
    ///
    /// Transactions already in flight keep the file open until they finish.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if let EngineState::Running(_) = *state {
            *state = EngineState::Stopped;
            info!(path = %self.path().display(), "Closed certificate store");
        } else {
            trace!(path = %self.path().display(), "Store not running, close is a no-op");
        }
    }

    fn database(&self) -> Result<Arc<Database>, StorageError> {
        match &*self.inner.state.lock() {
            EngineState::Running(db) => Ok(Arc::clone(db)),
            _ => Err(StorageError::Closed),
        }
    }

    /// Run `f` inside a read-only transaction on `bucket`
    ///
    /// Fails with [`StorageError::BucketNotFound`] if the bucket has never
    /// been written.
    pub fn with_read<T, E, F>(&self, bucket: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&ReadBucket<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let db = self.database()?;
        let txn = db.begin_read().map_err(engine)?;
        let table = match txn.open_table(table_definition(bucket)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => {
                trace!(bucket = %bucket, "Bucket does not exist");
                return Err(StorageError::BucketNotFound(bucket.to_string()).into());
            }
            Err(e) => return Err(engine(e).into()),
        };

        f(&ReadBucket {
            name: bucket,
            table,
        })
    }

    /// Run `f` inside a read-write transaction on `bucket`
    ///
    /// The bucket is created if absent. The transaction commits only if `f`
    /// returns `Ok`; on error nothing `f` wrote becomes visible.
    pub fn with_write<T, E, F>(&self, bucket: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteBucket<'_, '_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let db = self.database()?;
        let txn = db.begin_write().map_err(engine)?;

        let result = {
            let table = txn.open_table(table_definition(bucket)).map_err(engine)?;
            let mut handle = WriteBucket {
                name: bucket,
                table,
            };
            f(&mut handle)
        };

        match result {
            Ok(value) => {
                txn.commit().map_err(engine)?;
                trace!(bucket = %bucket, "Committed write transaction");
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(bucket = %bucket, error = %abort_err, "Failed to abort write transaction");
                }
                debug!(bucket = %bucket, "Rolled back write transaction");
                Err(err)
            }
        }
    }

    /// Run `f` while holding the lock for one record
    ///
    /// Every repository bound to this store takes the same lock for the same
    /// `(bucket, key)`, so read-modify-write sequences on one record are
    /// linearized while different records proceed in parallel.
    pub fn with_key_lock<T>(&self, bucket: &str, key: &[u8], f: impl FnOnce() -> T) -> T {
        let slot = (bucket.to_string(), key.to_vec());
        let lock = self
            .inner
            .key_locks
            .entry(slot.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock();
            f()
        };

        drop(lock);
        self.inner
            .key_locks
            .remove_if(&slot, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.options.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Read-only view of one bucket inside a transaction
pub struct ReadBucket<'a> {
    name: &'a str,
    table: ReadOnlyTable<RawBytes, RawBytes>,
}

impl ReadBucket<'_> {
    /// Bucket name
    pub fn name(&self) -> &str {
        self.name
    }

    /// Get the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.table.get(key).map_err(engine)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// All key/value pairs in key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        for entry in self.table.iter().map_err(engine)? {
            let (key, value) = entry.map_err(engine)?;
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }
}

/// Read-write view of one bucket inside a transaction
pub struct WriteBucket<'a, 'txn> {
    name: &'a str,
    table: Table<'txn, RawBytes, RawBytes>,
}

impl WriteBucket<'_, '_> {
    /// Bucket name
    pub fn name(&self) -> &str {
        self.name
    }

    /// Get the value stored under `key`, including writes made earlier in
    /// this transaction
    ///
    /// Repositories use this to confirm a record is unchanged before
    /// overwriting it.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.table.get(key).map_err(engine)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Store `value` under `key`
    ///
    /// Empty keys are rejected.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey {
                bucket: self.name.to_string(),
            });
        }
        self.table.insert(key, value).map_err(engine)?;
        Ok(())
    }
}

fn table_definition(bucket: &str) -> TableDefinition<'_, RawBytes, RawBytes> {
    TableDefinition::new(bucket)
}

fn engine(err: impl Into<redb::Error>) -> StorageError {
    StorageError::Engine(err.into())
}
