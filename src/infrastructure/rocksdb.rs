use super::kv::{KvBackend, KvOp, KvRead, Precondition, Table};
use super::store::KvStore;
use crate::error::{MerchantError, Result};
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A persistent key/value backend using RocksDB.
///
/// Every [`Table`] lives in its own Column Family. A committed unit of work
/// is written as a single `WriteBatch`, so it lands atomically. Commits are
/// serialized so that preconditions are checked against the state the batch
/// lands on.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksKv {
    db: Arc<DB>,
    commit: Arc<Mutex<()>>,
}

impl RocksKv {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that one column family per table exists.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = Table::ALL
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name(), Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, table: Table) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(table.name()).ok_or_else(|| {
            MerchantError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                table.name()
            ))))
        })
    }
}

impl KvRead for RocksKv {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(table)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let cf = self.cf(table)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (key, value) = item.map_err(|e| {
                MerchantError::InternalError(Box::new(std::io::Error::other(format!(
                    "RocksDB iteration error: {}",
                    e
                ))))
            })?;
            let key = String::from_utf8(key.to_vec()).map_err(|e| {
                MerchantError::InternalError(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Non UTF-8 key in {}: {}", table.name(), e),
                )))
            })?;
            rows.push((key, value.to_vec()));
        }
        Ok(rows)
    }
}

impl KvBackend for RocksKv {
    fn apply(&self, batch: Vec<KvOp>, preconditions: &[Precondition]) -> Result<()> {
        let _commit = self
            .commit
            .lock()
            .map_err(|_| MerchantError::StorageError("commit lock poisoned".into()))?;
        for precondition in preconditions {
            precondition(self as &dyn KvRead)?;
        }
        let mut write = WriteBatch::default();
        for op in &batch {
            let cf = self.cf(op.table())?;
            match op {
                KvOp::Put { key, value, .. } => write.put_cf(cf, key.as_bytes(), value),
                KvOp::Delete { key, .. } => write.delete_cf(cf, key.as_bytes()),
            }
        }
        self.db.write(write)?;
        Ok(())
    }
}

/// The typed gateway over RocksDB.
pub type RocksDBStore = KvStore<RocksKv>;

impl KvStore<RocksKv> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(RocksKv::open(path)?))
    }
}
