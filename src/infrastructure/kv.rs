use crate::error::Result;

/// One logical table. RocksDB maps each to a column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Merchants,
    Maps,
    Documents,
    Employees,
    Addresses,
    Outbox,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Merchants,
        Table::Maps,
        Table::Documents,
        Table::Employees,
        Table::Addresses,
        Table::Outbox,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Merchants => "merchants",
            Table::Maps => "merchant_maps",
            Table::Documents => "merchant_documents",
            Table::Employees => "merchant_employees",
            Table::Addresses => "addresses",
            Table::Outbox => "outbox",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put {
        table: Table,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: String,
    },
}

impl KvOp {
    pub fn table(&self) -> Table {
        match self {
            KvOp::Put { table, .. } | KvOp::Delete { table, .. } => *table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            KvOp::Put { key, .. } | KvOp::Delete { key, .. } => key,
        }
    }
}

/// Read side of a backend. Preconditions see committed state through it
/// while a batch is being applied.
pub trait KvRead {
    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>>;
    fn scan(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>>;
}

/// Check run by [`KvBackend::apply`] before the batch is written. Any error
/// aborts the whole batch.
pub type Precondition = Box<dyn Fn(&dyn KvRead) -> Result<()> + Send + Sync>;

/// Raw storage underneath the typed gateway.
///
/// `apply` must be atomic: the preconditions are evaluated and the batch
/// written with no other `apply` in between, and either every operation in
/// the batch becomes visible or none does.
pub trait KvBackend: KvRead + Send + Sync + 'static {
    fn apply(&self, batch: Vec<KvOp>, preconditions: &[Precondition]) -> Result<()>;
}
