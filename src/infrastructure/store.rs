use super::kv::{KvBackend, KvOp, KvRead, Precondition, Table};
use crate::config::ConcurrencyMode;
use crate::domain::address::Address;
use crate::domain::document::MerchantDocument;
use crate::domain::effects::OutboxRecord;
use crate::domain::employee::MerchantEmployee;
use crate::domain::merchant::{Maps, Merchant};
use crate::domain::ports::{
    AddressStore, DocumentStore, EmployeeStore, MapsStore, MerchantStore, OutboxStore,
    TransactionManager, UnitOfWork,
};
use crate::error::{MerchantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Arms a single write failure, counted across every unit of work of a
/// store. Used to exercise rollback paths.
#[derive(Debug, Default)]
pub struct FaultPlan {
    fail_at: Mutex<Option<usize>>,
    writes: AtomicUsize,
}

impl FaultPlan {
    /// Fails the `index`-th write (0-based) issued from now on.
    pub fn fail_write_at(&self, index: usize) {
        if let Ok(mut fail_at) = self.fail_at.lock() {
            *fail_at = Some(index);
        }
        self.writes.store(0, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        if let Ok(mut fail_at) = self.fail_at.lock() {
            *fail_at = None;
        }
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Writes attempted since the plan was last armed or cleared.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, what: &str) -> Result<()> {
        let mut fail_at = self
            .fail_at
            .lock()
            .map_err(|_| MerchantError::StorageError("fault plan poisoned".into()))?;
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        if *fail_at == Some(index) {
            *fail_at = None;
            return Err(MerchantError::StorageError(format!(
                "injected failure writing {what}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TxCounters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    document_resets: AtomicUsize,
}

/// Transaction bookkeeping, used to check that every begin is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub document_resets: usize,
}

impl TxStats {
    pub fn open(&self) -> usize {
        self.begun
            .saturating_sub(self.committed)
            .saturating_sub(self.rolled_back)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// The only column a version check needs.
#[derive(Deserialize)]
struct RowVersion {
    version: u64,
}

fn stored_version(view: &dyn KvRead, merchant_id: &str) -> Result<Option<u64>> {
    view.get(Table::Merchants, merchant_id)?
        .map(|bytes| decode::<RowVersion>(&bytes).map(|row| row.version))
        .transpose()
}

/// Ids of the owner's primary addresses, sorted.
fn primary_ids(view: &dyn KvRead, owner_id: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for (_, bytes) in view.scan(Table::Addresses)? {
        let address: Address = decode(&bytes)?;
        if address.owner_id == owner_id && address.is_primary {
            ids.push(address.id);
        }
    }
    ids.sort();
    Ok(ids)
}

fn merchant_row(merchant: &Merchant) -> Result<Vec<u8>> {
    let mut row = merchant.clone();
    row.maps = None;
    encode(&row)
}

/// Typed persistence gateway over any [`KvBackend`].
///
/// Reads see committed state only. Writes go through a [`KvUnitOfWork`] and
/// land atomically on commit.
pub struct KvStore<B: KvBackend> {
    backend: Arc<B>,
    concurrency: ConcurrencyMode,
    faults: Arc<FaultPlan>,
    counters: Arc<TxCounters>,
}

impl<B: KvBackend> KvStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            concurrency: ConcurrencyMode::default(),
            faults: Arc::new(FaultPlan::default()),
            counters: Arc::new(TxCounters::default()),
        }
    }

    pub fn with_concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    pub fn stats(&self) -> TxStats {
        TxStats {
            begun: self.counters.begun.load(Ordering::SeqCst),
            committed: self.counters.committed.load(Ordering::SeqCst),
            rolled_back: self.counters.rolled_back.load(Ordering::SeqCst),
            document_resets: self.counters.document_resets.load(Ordering::SeqCst),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        self.backend
            .get(table, key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn scan_json<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>> {
        self.backend
            .scan(table)?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    fn with_maps(&self, mut merchant: Merchant) -> Result<Merchant> {
        merchant.maps = self.get_json(Table::Maps, &merchant.id)?;
        Ok(merchant)
    }

    fn find_merchant_by(&self, predicate: impl Fn(&Merchant) -> bool) -> Result<Option<Merchant>> {
        let found = self
            .scan_json::<Merchant>(Table::Merchants)?
            .into_iter()
            .find(|m| predicate(m));
        found.map(|m| self.with_maps(m)).transpose()
    }
}

#[async_trait]
impl<B: KvBackend> MerchantStore for KvStore<B> {
    async fn find(&self, id: &str) -> Result<Option<Merchant>> {
        self.get_json::<Merchant>(Table::Merchants, id)?
            .map(|m| self.with_maps(m))
            .transpose()
    }

    async fn find_by_member(&self, member_id: &str) -> Result<Option<Merchant>> {
        self.find_merchant_by(|m| m.member_id == member_id && !m.is_deleted())
    }

    async fn find_by_url(&self, merchant_url: &str) -> Result<Option<Merchant>> {
        self.find_merchant_by(|m| m.merchant_url == merchant_url)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Merchant>> {
        self.find_merchant_by(|m| m.merchant_email.eq_ignore_ascii_case(email))
    }

    async fn all(&self) -> Result<Vec<Merchant>> {
        let mut merchants = self
            .scan_json::<Merchant>(Table::Merchants)?
            .into_iter()
            .map(|m| self.with_maps(m))
            .collect::<Result<Vec<_>>>()?;
        merchants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(merchants)
    }
}

#[async_trait]
impl<B: KvBackend> MapsStore for KvStore<B> {
    async fn find(&self, merchant_id: &str) -> Result<Option<Maps>> {
        self.get_json(Table::Maps, merchant_id)
    }
}

#[async_trait]
impl<B: KvBackend> DocumentStore for KvStore<B> {
    async fn find(&self, id: &str) -> Result<Option<MerchantDocument>> {
        self.get_json(Table::Documents, id)
    }

    async fn find_by_value(&self, document_value: &str) -> Result<Option<MerchantDocument>> {
        Ok(self
            .scan_json::<MerchantDocument>(Table::Documents)?
            .into_iter()
            .find(|d| d.document_value == document_value))
    }

    async fn find_by_merchant(&self, merchant_id: &str) -> Result<Vec<MerchantDocument>> {
        Ok(self
            .scan_json::<MerchantDocument>(Table::Documents)?
            .into_iter()
            .filter(|d| d.merchant_id == merchant_id)
            .collect())
    }
}

#[async_trait]
impl<B: KvBackend> EmployeeStore for KvStore<B> {
    async fn find(&self, id: &str) -> Result<Option<MerchantEmployee>> {
        self.get_json(Table::Employees, id)
    }

    async fn find_by_member(
        &self,
        merchant_id: &str,
        member_id: &str,
    ) -> Result<Option<MerchantEmployee>> {
        Ok(self
            .scan_json::<MerchantEmployee>(Table::Employees)?
            .into_iter()
            .find(|e| e.merchant_id == merchant_id && e.member_id == member_id))
    }

    async fn find_by_merchant(&self, merchant_id: &str) -> Result<Vec<MerchantEmployee>> {
        Ok(self
            .scan_json::<MerchantEmployee>(Table::Employees)?
            .into_iter()
            .filter(|e| e.merchant_id == merchant_id)
            .collect())
    }
}

#[async_trait]
impl<B: KvBackend> AddressStore for KvStore<B> {
    async fn find(&self, id: &str) -> Result<Option<Address>> {
        self.get_json(Table::Addresses, id)
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Address>> {
        Ok(self
            .scan_json::<Address>(Table::Addresses)?
            .into_iter()
            .filter(|a| a.owner_id == owner_id)
            .collect())
    }
}

#[async_trait]
impl<B: KvBackend> OutboxStore for KvStore<B> {
    async fn pending(&self) -> Result<Vec<OutboxRecord>> {
        let mut records: Vec<OutboxRecord> = self
            .scan_json::<OutboxRecord>(Table::Outbox)?
            .into_iter()
            .filter(|r| !r.dispatched)
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn mark_dispatched(&self, id: &str) -> Result<()> {
        let mut record: OutboxRecord = self
            .get_json(Table::Outbox, id)?
            .ok_or_else(|| MerchantError::not_found("outbox record", id))?;
        record.dispatched = true;
        self.backend.apply(
            vec![KvOp::Put {
                table: Table::Outbox,
                key: record.id.clone(),
                value: encode(&record)?,
            }],
            &[],
        )
    }
}

#[async_trait]
impl<B: KvBackend> TransactionManager for KvStore<B> {
    async fn begin(&self) -> Result<Arc<dyn UnitOfWork>> {
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(KvUnitOfWork {
            backend: Arc::clone(&self.backend),
            concurrency: self.concurrency,
            faults: Arc::clone(&self.faults),
            counters: Arc::clone(&self.counters),
            staged: Mutex::new(Staged::default()),
            finalized: AtomicBool::new(false),
        }))
    }
}

#[derive(Default)]
struct Staged {
    ops: Vec<KvOp>,
    /// Latest staged value per row, `None` for a staged delete.
    overlay: BTreeMap<(Table, String), Option<Vec<u8>>>,
    /// Re-checked by the backend at commit, against whatever landed since.
    guards: Vec<Precondition>,
}

/// Write scope over a [`KvBackend`]: buffers operations and applies them as
/// one batch on commit.
pub struct KvUnitOfWork<B: KvBackend> {
    backend: Arc<B>,
    concurrency: ConcurrencyMode,
    faults: Arc<FaultPlan>,
    counters: Arc<TxCounters>,
    staged: Mutex<Staged>,
    finalized: AtomicBool,
}

impl<B: KvBackend> KvUnitOfWork<B> {
    fn ensure_open(&self) -> Result<()> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(MerchantError::StorageError(
                "transaction already finalized".into(),
            ));
        }
        Ok(())
    }

    fn staged(&self) -> Result<std::sync::MutexGuard<'_, Staged>> {
        self.staged
            .lock()
            .map_err(|_| MerchantError::StorageError("transaction state poisoned".into()))
    }

    fn stage(&self, op: KvOp) -> Result<()> {
        let mut staged = self.staged()?;
        let row = (op.table(), op.key().to_string());
        let value = match &op {
            KvOp::Put { value, .. } => Some(value.clone()),
            KvOp::Delete { .. } => None,
        };
        staged.overlay.insert(row, value);
        staged.ops.push(op);
        Ok(())
    }

    fn guard(&self, precondition: Precondition) -> Result<()> {
        self.staged()?.guards.push(precondition);
        Ok(())
    }

    /// Checks the committed merchant version now and again at commit.
    fn guard_merchant_version(&self, merchant_id: &str, version: u64) -> Result<()> {
        let conflict = move |id: &str, found: u64| MerchantError::Conflict {
            id: id.to_string(),
            expected: version,
            found,
        };
        match stored_version(self.backend.as_ref(), merchant_id)? {
            Some(found) if found != version => return Err(conflict(merchant_id, found)),
            Some(_) => {}
            None => return Err(MerchantError::not_found("merchant", merchant_id)),
        }
        let id = merchant_id.to_string();
        self.guard(Box::new(move |view: &dyn KvRead| {
            match stored_version(view, &id)? {
                Some(found) if found == version => Ok(()),
                Some(found) => Err(conflict(id.as_str(), found)),
                None => Err(MerchantError::not_found("merchant", id.as_str())),
            }
        }))
    }

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<()> {
        self.stage(KvOp::Put {
            table,
            key: key.to_string(),
            value: encode(value)?,
        })
    }

    /// Reads a row as this unit sees it: staged writes first, then committed.
    fn read<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        let staged = self
            .staged()?
            .overlay
            .get(&(table, key.to_string()))
            .cloned();
        let bytes = match staged {
            Some(value) => value,
            None => self.backend.get(table, key)?,
        };
        bytes.map(|b| decode(&b)).transpose()
    }

    fn scan<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>> {
        let mut rows: BTreeMap<String, Vec<u8>> = self.backend.scan(table)?.into_iter().collect();
        for ((t, key), value) in self.staged()?.overlay.iter() {
            if *t != table {
                continue;
            }
            match value {
                Some(bytes) => {
                    rows.insert(key.clone(), bytes.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        rows.values().map(|bytes| decode(bytes)).collect()
    }
}

#[async_trait]
impl<B: KvBackend> UnitOfWork for KvUnitOfWork<B> {
    async fn save_merchant(
        &self,
        merchant: &Merchant,
        expected_version: Option<u64>,
    ) -> Result<Merchant> {
        self.ensure_open()?;
        self.faults.check("merchant")?;
        if self.concurrency == ConcurrencyMode::Optimistic
            && let Some(expected) = expected_version
            && let Some(seen) = self.read::<RowVersion>(Table::Merchants, &merchant.id)?
        {
            if seen.version != expected {
                return Err(MerchantError::Conflict {
                    id: merchant.id.clone(),
                    expected,
                    found: seen.version,
                });
            }
            if let Some(committed) = stored_version(self.backend.as_ref(), &merchant.id)? {
                self.guard_merchant_version(&merchant.id, committed)?;
            }
        }
        self.stage(KvOp::Put {
            table: Table::Merchants,
            key: merchant.id.clone(),
            value: merchant_row(merchant)?,
        })?;
        Ok(merchant.clone())
    }

    async fn require_merchant_version(&self, merchant_id: &str, version: u64) -> Result<()> {
        self.ensure_open()?;
        self.guard_merchant_version(merchant_id, version)
    }

    async fn save_maps(&self, merchant_id: &str, maps: &Maps) -> Result<Maps> {
        self.ensure_open()?;
        self.faults.check("maps")?;
        self.put(Table::Maps, merchant_id, maps)?;
        Ok(maps.clone())
    }

    async fn delete_maps(&self, merchant_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.faults.check("maps")?;
        self.stage(KvOp::Delete {
            table: Table::Maps,
            key: merchant_id.to_string(),
        })
    }

    async fn save_document(&self, document: &MerchantDocument) -> Result<MerchantDocument> {
        self.ensure_open()?;
        self.faults.check("document")?;
        self.put(Table::Documents, &document.id, document)?;
        Ok(document.clone())
    }

    async fn reset_pending_documents(&self, merchant_id: &str) -> Result<usize> {
        self.ensure_open()?;
        self.faults.check("document reset")?;
        self.counters.document_resets.fetch_add(1, Ordering::SeqCst);
        let pending: Vec<MerchantDocument> = self
            .scan::<MerchantDocument>(Table::Documents)?
            .into_iter()
            .filter(|d| d.merchant_id == merchant_id && d.is_pending_upgrade)
            .collect();
        for mut document in pending.iter().cloned() {
            document.is_pending_upgrade = false;
            self.put(Table::Documents, &document.id, &document)?;
        }
        Ok(pending.len())
    }

    async fn save_employee(&self, employee: &MerchantEmployee) -> Result<MerchantEmployee> {
        self.ensure_open()?;
        self.faults.check("employee")?;
        self.put(Table::Employees, &employee.id, employee)?;
        Ok(employee.clone())
    }

    async fn save_address(&self, address: &Address) -> Result<Address> {
        self.ensure_open()?;
        self.faults.check("address")?;
        self.put(Table::Addresses, &address.id, address)?;
        Ok(address.clone())
    }

    async fn unset_primary_addresses(&self, owner_id: &str) -> Result<usize> {
        self.ensure_open()?;
        self.faults.check("address")?;
        let observed = primary_ids(self.backend.as_ref(), owner_id)?;
        let owner = owner_id.to_string();
        self.guard(Box::new(move |view: &dyn KvRead| {
            if primary_ids(view, &owner)? == observed {
                Ok(())
            } else {
                Err(MerchantError::Contention {
                    entity: "address owner",
                    id: owner.clone(),
                })
            }
        }))?;
        let primaries: Vec<Address> = self
            .scan::<Address>(Table::Addresses)?
            .into_iter()
            .filter(|a| a.owner_id == owner_id && a.is_primary)
            .collect();
        for mut address in primaries.iter().cloned() {
            address.is_primary = false;
            self.put(Table::Addresses, &address.id, &address)?;
        }
        Ok(primaries.len())
    }

    async fn enqueue_outbox(&self, record: &OutboxRecord) -> Result<()> {
        self.ensure_open()?;
        self.faults.check("outbox")?;
        self.put(Table::Outbox, &record.id, record)
    }

    async fn commit(&self) -> Result<()> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(MerchantError::StorageError(
                "transaction already finalized".into(),
            ));
        }
        let (ops, guards) = {
            let mut staged = self.staged()?;
            staged.overlay.clear();
            (
                std::mem::take(&mut staged.ops),
                std::mem::take(&mut staged.guards),
            )
        };
        match self.backend.apply(ops, &guards) {
            Ok(()) => {
                self.counters.committed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                // Nothing from the batch is visible, which is a rollback.
                self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn rollback(&self) -> Result<()> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            tracing::debug!("rollback on an already finalized transaction ignored");
            return Ok(());
        }
        let mut staged = self.staged()?;
        staged.ops.clear();
        staged.overlay.clear();
        staged.guards.clear();
        self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
