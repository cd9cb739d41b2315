use super::address::Address;
use super::document::MerchantDocument;
use super::effects::{AuditMetadata, EmailPayload, OutboxRecord, Template};
use super::employee::MerchantEmployee;
use super::merchant::{Maps, Merchant};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

// Reads go straight to committed state and may be shared across operations.

#[async_trait]
pub trait MerchantStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Merchant>>;
    async fn find_by_member(&self, member_id: &str) -> Result<Option<Merchant>>;
    async fn find_by_url(&self, merchant_url: &str) -> Result<Option<Merchant>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Merchant>>;
    async fn all(&self) -> Result<Vec<Merchant>>;
}

#[async_trait]
pub trait MapsStore: Send + Sync {
    async fn find(&self, merchant_id: &str) -> Result<Option<Maps>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<MerchantDocument>>;
    async fn find_by_value(&self, document_value: &str) -> Result<Option<MerchantDocument>>;
    async fn find_by_merchant(&self, merchant_id: &str) -> Result<Vec<MerchantDocument>>;
}

#[async_trait]
pub trait EmployeeStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<MerchantEmployee>>;
    async fn find_by_member(
        &self,
        merchant_id: &str,
        member_id: &str,
    ) -> Result<Option<MerchantEmployee>>;
    async fn find_by_merchant(&self, merchant_id: &str) -> Result<Vec<MerchantEmployee>>;
}

#[async_trait]
pub trait AddressStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Address>>;
    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Address>>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn pending(&self) -> Result<Vec<OutboxRecord>>;
    async fn mark_dispatched(&self, id: &str) -> Result<()>;
}

/// A logical write scope. Writes are staged until `commit`; `rollback`
/// discards them. Exactly one of the two is called per scope.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Saves the merchant row. With optimistic locking enabled the stored
    /// version must equal `expected_version`, both now and at commit.
    async fn save_merchant(
        &self,
        merchant: &Merchant,
        expected_version: Option<u64>,
    ) -> Result<Merchant>;
    /// Fails now, or at commit, if the stored merchant is no longer at
    /// `version`. Applies whatever the concurrency mode.
    async fn require_merchant_version(&self, merchant_id: &str, version: u64) -> Result<()>;
    async fn save_maps(&self, merchant_id: &str, maps: &Maps) -> Result<Maps>;
    async fn delete_maps(&self, merchant_id: &str) -> Result<()>;
    async fn save_document(&self, document: &MerchantDocument) -> Result<MerchantDocument>;
    /// Clears the pending-upgrade marker on every document of the merchant.
    async fn reset_pending_documents(&self, merchant_id: &str) -> Result<usize>;
    async fn save_employee(&self, employee: &MerchantEmployee) -> Result<MerchantEmployee>;
    async fn save_address(&self, address: &Address) -> Result<Address>;
    /// Unsets the primary flag on every address of the owner. The commit
    /// fails if the owner's primaries change in the meantime.
    async fn unset_primary_addresses(&self, owner_id: &str) -> Result<usize>;
    async fn enqueue_outbox(&self, record: &OutboxRecord) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> Result<Arc<dyn UnitOfWork>>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, payload: &EmailPayload) -> Result<()>;
}

#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn template_by_id(&self, id: &str) -> Result<Template>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &Value) -> Result<()>;
    /// Fire-and-forget background job.
    async fn enqueue_job(&self, payload: &Value, target_id: &str, job_name: &str);
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn insert_log(
        &self,
        before: Option<&Value>,
        after: Option<&Value>,
        metadata: &AuditMetadata,
    ) -> Result<()>;
}

/// Every persistence port a workflow needs.
#[derive(Clone)]
pub struct Stores {
    pub merchants: Arc<dyn MerchantStore>,
    pub maps: Arc<dyn MapsStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub employees: Arc<dyn EmployeeStore>,
    pub addresses: Arc<dyn AddressStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub transactions: Arc<dyn TransactionManager>,
}

impl Stores {
    /// Wires every port to one backend that implements them all.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: MerchantStore
            + MapsStore
            + DocumentStore
            + EmployeeStore
            + AddressStore
            + OutboxStore
            + TransactionManager
            + 'static,
    {
        Self {
            merchants: backend.clone(),
            maps: backend.clone(),
            documents: backend.clone(),
            employees: backend.clone(),
            addresses: backend.clone(),
            outbox: backend.clone(),
            transactions: backend,
        }
    }
}

/// External services reached by the side-effect dispatcher.
#[derive(Clone)]
pub struct Services {
    pub email: Arc<dyn EmailSender>,
    pub templates: Arc<dyn TemplateSource>,
    pub events: Arc<dyn EventPublisher>,
    pub audit: Arc<dyn AuditLog>,
}
