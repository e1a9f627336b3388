//! Persistent key-value stores consumed by the Diana client and server,
//! implemented directly on `rocksdb` column families.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};

use crate::error::{Result, SseError};

const CF_COUNTERS: &str = "counters";
const CF_TOKENS: &str = "tokens";

/// The client's per-keyword monotonic counter map. Sequential consistency
/// per key; concurrent increments on different keywords never block each
/// other.
pub trait CounterStore: Send + Sync {
    fn get(&self, keyword: &[u8]) -> Result<Option<u32>>;

    /// Atomically return the pre-increment value (0 if absent) and persist
    /// the incremented counter.
    fn get_and_increment(&self, keyword: &[u8]) -> Result<u32>;

    fn set(&self, keyword: &[u8], value: u32) -> Result<()>;

    fn remove(&self, keyword: &[u8]) -> Result<()>;

    /// `blocking = true` waits for the flush to reach stable storage before
    /// returning; `false` schedules it and returns immediately.
    fn flush(&self, blocking: bool) -> Result<()>;
}

/// The server's `update_token -> masked index` map. Entries are only ever
/// inserted, never mutated.
pub trait TokenStore: Send + Sync {
    fn get(&self, token: &[u8; 16]) -> Result<Option<Vec<u8>>>;

    fn put(&self, token: [u8; 16], value: Vec<u8>) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

fn cf_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts
}

fn open_db(path: &Path, cf_names: &[&str]) -> Result<DB> {
    let mut db_opts = Options::default();
    db_opts.create_if_missing(true);
    db_opts.create_missing_column_families(true);

    let descriptors: Vec<ColumnFamilyDescriptor> = cf_names
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, cf_options()))
        .collect();

    DB::open_cf_descriptors(&db_opts, path, descriptors)
        .map_err(SseError::StoreFailure)
}

/// RocksDB-backed `CounterStore`. Get-and-increment takes `increment_lock`
/// for the duration of its read-modify-write so concurrent callers on the
/// same (or different) keywords never observe or persist a stale value.
pub struct RocksCounterStore {
    db: Arc<DB>,
    increment_lock: Mutex<()>,
}

impl RocksCounterStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = open_db(path.as_ref(), &[CF_COUNTERS])?;
        Ok(Self { db: Arc::new(db), increment_lock: Mutex::new(()) })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_COUNTERS)
            .ok_or_else(|| SseError::CorruptData("missing counters column family".into()))
    }
}

impl CounterStore for RocksCounterStore {
    fn get(&self, keyword: &[u8]) -> Result<Option<u32>> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, keyword).map_err(SseError::StoreFailure)? {
            Some(bytes) => Ok(Some(decode_u32(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_and_increment(&self, keyword: &[u8]) -> Result<u32> {
        let _guard = self.increment_lock.lock();
        let cf = self.cf()?;
        let current = self.get(keyword)?.unwrap_or(0);
        let mut batch = rocksdb::WriteBatch::default();
        batch.put_cf(cf, keyword, (current + 1).to_le_bytes());
        self.db.write(batch).map_err(SseError::StoreFailure)?;
        Ok(current)
    }

    fn set(&self, keyword: &[u8], value: u32) -> Result<()> {
        let cf = self.cf()?;
        self.db
            .put_cf(cf, keyword, value.to_le_bytes())
            .map_err(SseError::StoreFailure)?;
        Ok(())
    }

    fn remove(&self, keyword: &[u8]) -> Result<()> {
        let cf = self.cf()?;
        self.db.delete_cf(cf, keyword).map_err(SseError::StoreFailure)?;
        Ok(())
    }

    fn flush(&self, blocking: bool) -> Result<()> {
        let mut opts = rocksdb::FlushOptions::default();
        opts.set_wait(blocking);
        self.db.flush_opt(&opts).map_err(SseError::StoreFailure)?;
        Ok(())
    }
}

fn decode_u32(bytes: &[u8]) -> Result<u32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| SseError::CorruptData("counter value is not 4 bytes".into()))?;
    Ok(u32::from_le_bytes(arr))
}

/// RocksDB-backed `TokenStore`.
pub struct RocksTokenStore {
    db: Arc<DB>,
}

impl RocksTokenStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = open_db(path.as_ref(), &[CF_TOKENS])?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_TOKENS)
            .ok_or_else(|| SseError::CorruptData("missing tokens column family".into()))
    }
}

impl TokenStore for RocksTokenStore {
    fn get(&self, token: &[u8; 16]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf()?;
        self.db.get_cf(cf, token).map_err(SseError::StoreFailure)
    }

    fn put(&self, token: [u8; 16], value: Vec<u8>) -> Result<()> {
        let cf = self.cf()?;
        self.db.put_cf(cf, token, value).map_err(SseError::StoreFailure)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(SseError::StoreFailure)?;
        Ok(())
    }
}
