use super::kv::{KvBackend, KvOp, KvRead, Precondition, Table};
use super::store::KvStore;
use crate::error::{MerchantError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// A thread-safe in-memory key/value backend.
///
/// Uses `RwLock<HashMap<Table, BTreeMap<..>>>` so a whole batch is applied
/// under one write lock. Ideal for tests and for runs that need no
/// persistence.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    tables: RwLock<HashMap<Table, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryKv {
    /// Creates a new, empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

type Tables = HashMap<Table, BTreeMap<String, Vec<u8>>>;

fn poisoned() -> MerchantError {
    MerchantError::StorageError("in-memory tables poisoned".into())
}

fn get_row(tables: &Tables, table: Table, key: &str) -> Option<Vec<u8>> {
    tables.get(&table).and_then(|rows| rows.get(key)).cloned()
}

fn scan_rows(tables: &Tables, table: Table) -> Vec<(String, Vec<u8>)> {
    tables
        .get(&table)
        .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Committed rows as seen from inside `apply`, while the write lock is held.
struct LockedView<'a>(&'a Tables);

impl KvRead for LockedView<'_> {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(get_row(self.0, table, key))
    }

    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(scan_rows(self.0, table))
    }
}

impl KvRead for InMemoryKv {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(get_row(&tables, table, key))
    }

    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(scan_rows(&tables, table))
    }
}

impl KvBackend for InMemoryKv {
    fn apply(&self, batch: Vec<KvOp>, preconditions: &[Precondition]) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let locked = LockedView(&*tables);
        let view: &dyn KvRead = &locked;
        for precondition in preconditions {
            precondition(view)?;
        }
        for op in batch {
            match op {
                KvOp::Put { table, key, value } => {
                    tables.entry(table).or_default().insert(key, value);
                }
                KvOp::Delete { table, key } => {
                    if let Some(rows) = tables.get_mut(&table) {
                        rows.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

/// The typed gateway over the in-memory backend.
pub type InMemoryStore = KvStore<InMemoryKv>;

impl KvStore<InMemoryKv> {
    pub fn in_memory() -> Self {
        Self::new(InMemoryKv::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(table: Table, key: &str, value: &[u8]) -> KvOp {
        KvOp::Put {
            table,
            key: key.into(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_in_memory_apply_and_get() {
        let kv = InMemoryKv::new();
        kv.apply(
            vec![
                put(Table::Merchants, "M1", b"one"),
                put(Table::Maps, "M1", b"geo"),
            ],
            &[],
        )
        .unwrap();

        assert_eq!(kv.get(Table::Merchants, "M1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(kv.get(Table::Maps, "M1").unwrap(), Some(b"geo".to_vec()));
        assert!(kv.get(Table::Documents, "M1").unwrap().is_none());
    }

    #[test]
    fn test_in_memory_delete_and_scan() {
        let kv = InMemoryKv::new();
        kv.apply(
            vec![
                put(Table::Documents, "b", b"2"),
                put(Table::Documents, "a", b"1"),
                KvOp::Delete {
                    table: Table::Documents,
                    key: "b".into(),
                },
            ],
            &[],
        )
        .unwrap();

        let rows = kv.scan(Table::Documents).unwrap();
        assert_eq!(rows, vec![("a".to_string(), b"1".to_vec())]);
        assert!(kv.scan(Table::Outbox).unwrap().is_empty());
    }

    #[test]
    fn test_failed_precondition_writes_nothing() {
        let kv = InMemoryKv::new();
        kv.apply(vec![put(Table::Merchants, "M1", b"v1")], &[]).unwrap();

        let expect_v1: Precondition = Box::new(|view: &dyn KvRead| {
            match view.get(Table::Merchants, "M1")?.as_deref() {
                Some(b"v1") => Ok(()),
                _ => Err(MerchantError::StorageError("moved".into())),
            }
        });
        kv.apply(vec![put(Table::Merchants, "M1", b"v2")], std::slice::from_ref(&expect_v1))
            .unwrap();
        let err = kv
            .apply(
                vec![put(Table::Merchants, "M1", b"v3"), put(Table::Maps, "M1", b"geo")],
                std::slice::from_ref(&expect_v1),
            )
            .unwrap_err();

        assert!(matches!(err, MerchantError::StorageError(_)));
        assert_eq!(kv.get(Table::Merchants, "M1").unwrap(), Some(b"v2".to_vec()));
        assert!(kv.get(Table::Maps, "M1").unwrap().is_none());
    }
}
