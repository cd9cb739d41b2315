//! Merchant workflow operations.
//!
//! Every operation follows the same shape: validate the input, load the
//! current state, ask [`crate::domain::rules`] for the next state, then stage
//! all writes and the resulting side effects in one unit of work. Side
//! effects are handed to the [`Dispatcher`] only after the commit, and the
//! operation returns without waiting for them.

mod addresses;
mod employees;
mod lifecycle;
mod profile;
mod upgrade;

pub use addresses::{NewAddress, SetPrimaryAddress};
pub use employees::{EmployeeStatusChange, NewEmployee};
pub use lifecycle::{AdminUpdate, Registration, Rejection};
pub use profile::{ERR_RENAME_LIMIT, MerchantProfile, PartialSelfUpdate, Rename, SelfUpdate};
pub use upgrade::UpgradeRequest;

use super::dispatcher::Dispatcher;
use super::fanout::DocumentProcessor;
use super::transaction::run_in_transaction;
use crate::config::WorkflowConfig;
use crate::domain::address::Address;
use crate::domain::document::{DocumentInput, MerchantDocument};
use crate::domain::effects::{EmailIntent, EmailKind, EventKind, OutboxRecord, SideEffect};
use crate::domain::employee::MerchantEmployee;
use crate::domain::merchant::{Actor, Maps, Merchant};
use crate::domain::ports::{Services, Stores, UnitOfWork};
use crate::error::{MerchantError, Result};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Who is calling, and how long they are willing to wait.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor: Actor,
    pub deadline: Option<Duration>,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A merchant together with the documents the operation wrote (or, for
/// [`MerchantWorkflow::get_merchant`], every document it owns).
#[derive(Debug, Clone, PartialEq)]
pub struct MerchantSnapshot {
    pub merchant: Merchant,
    pub documents: Vec<MerchantDocument>,
}

pub struct MerchantWorkflow {
    stores: Stores,
    config: Arc<WorkflowConfig>,
    documents: DocumentProcessor,
    dispatcher: Dispatcher,
}

/// Maps infrastructure failures to the generic error callers see, logging the
/// cause. Domain errors pass through untouched.
pub(crate) fn persistence(what: &'static str) -> impl Fn(MerchantError) -> MerchantError {
    move |err| match err {
        MerchantError::ValidationError(_)
        | MerchantError::NotFound { .. }
        | MerchantError::AlreadyExists(_)
        | MerchantError::Conflict { .. }
        | MerchantError::Contention { .. }
        | MerchantError::PersistenceError(_)
        | MerchantError::Cancelled(_) => err,
        cause => {
            tracing::error!(error = %cause, "failed to save {what}");
            MerchantError::PersistenceError(format!("failed to save {what}"))
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| MerchantError::InternalError(Box::new(e)))
}

pub(crate) fn audit<T: Serialize>(
    action: &str,
    target_id: &str,
    before: Option<&T>,
    after: Option<&T>,
    actor: &Actor,
) -> Result<SideEffect> {
    Ok(SideEffect::Audit {
        action: action.to_string(),
        target_id: target_id.to_string(),
        before: before.map(to_json).transpose()?,
        after: after.map(to_json).transpose()?,
        actor: actor.clone(),
    })
}

pub(crate) fn event(kind: EventKind, merchant: &Merchant) -> Result<SideEffect> {
    Ok(SideEffect::Event {
        kind,
        key: merchant.id.clone(),
        payload: to_json(merchant)?,
    })
}

pub(crate) fn email(kind: EmailKind, merchant: &Merchant, actor: &Actor) -> SideEffect {
    SideEffect::Email(EmailIntent {
        kind,
        to: merchant.merchant_email.clone(),
        merchant_name: merchant.merchant_name.clone(),
        full_name: merchant.full_name.clone(),
        upgrade_status: merchant.upgrade_status,
        reason: merchant.reason.clone(),
        admin_name: actor.name.clone(),
    })
}

impl MerchantWorkflow {
    pub fn new(stores: Stores, services: Services, config: WorkflowConfig) -> Self {
        let config = Arc::new(config);
        let documents = DocumentProcessor::new(stores.documents.clone(), Arc::clone(&config));
        let dispatcher = Dispatcher::new(services, stores.outbox.clone(), Arc::clone(&config));
        Self {
            stores,
            config,
            documents,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Reads a merchant and every document it owns. Deleted merchants are
    /// returned as they were left.
    #[tracing::instrument(skip_all, fields(merchant_id = %merchant_id))]
    pub async fn get_merchant(&self, merchant_id: &str) -> Result<MerchantSnapshot> {
        let merchant = self
            .stores
            .merchants
            .find(merchant_id)
            .await?
            .ok_or_else(|| MerchantError::not_found("merchant", merchant_id))?;
        let documents = self.stores.documents.find_by_merchant(merchant_id).await?;
        Ok(MerchantSnapshot {
            merchant,
            documents,
        })
    }

    /// Every merchant, oldest first.
    pub async fn list_merchants(&self) -> Result<Vec<Merchant>> {
        self.stores.merchants.all().await
    }

    /// Looks a merchant up by its vanity URL.
    pub async fn merchant_by_url(&self, merchant_url: &str) -> Result<Merchant> {
        self.stores
            .merchants
            .find_by_url(merchant_url)
            .await?
            .ok_or_else(|| MerchantError::not_found("merchant", merchant_url))
    }

    pub async fn employee_of(&self, merchant_id: &str, member_id: &str) -> Result<MerchantEmployee> {
        self.stores
            .employees
            .find_by_member(merchant_id, member_id)
            .await?
            .ok_or_else(|| MerchantError::not_found("employee", member_id))
    }

    pub async fn addresses_of(&self, owner_id: &str) -> Result<Vec<Address>> {
        self.stores.addresses.find_by_owner(owner_id).await
    }

    /// Loads a merchant that must exist and must not be deleted.
    async fn load_merchant(&self, merchant_id: &str) -> Result<Merchant> {
        match self.stores.merchants.find(merchant_id).await? {
            Some(merchant) if !merchant.is_deleted() => Ok(merchant),
            _ => Err(MerchantError::not_found("merchant", merchant_id)),
        }
    }

    async fn within_deadline<T>(
        &self,
        ctx: &RequestContext,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match ctx.deadline {
            None => operation.await,
            Some(deadline) => tokio::time::timeout(deadline, operation)
                .await
                .map_err(|_| {
                    tracing::warn!(?deadline, "deadline exceeded before commit");
                    MerchantError::Cancelled(format!("deadline of {deadline:?} exceeded"))
                })?,
        }
    }

    /// Runs `work` in a fresh transaction, stages the side effects it returns
    /// in the outbox, commits, and hands them to the dispatcher.
    async fn execute<T, F, Fut>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn UnitOfWork>) -> Fut,
        Fut: Future<Output = Result<(T, Vec<SideEffect>)>>,
    {
        let now = Utc::now();
        let (value, records) = run_in_transaction(self.stores.transactions.as_ref(), |unit| async move {
            let (value, effects) = work(Arc::clone(&unit)).await?;
            let mut records = Vec::with_capacity(effects.len());
            for effect in effects {
                let record = OutboxRecord::new(operation, effect, now);
                unit.enqueue_outbox(&record)
                    .await
                    .map_err(persistence("side effects"))?;
                records.push(record);
            }
            Ok::<_, MerchantError>((value, records))
        })
        .await
        .map_err(persistence("merchant"))?;

        tracing::info!(operation, effects = records.len(), "committed");
        self.dispatcher.dispatch(records);
        Ok(value)
    }

    async fn save_merchant(
        unit: &dyn UnitOfWork,
        merchant: &Merchant,
        expected_version: Option<u64>,
    ) -> Result<Merchant> {
        let mut saved = unit
            .save_merchant(merchant, expected_version)
            .await
            .map_err(persistence("merchant"))?;
        saved.maps.clone_from(&merchant.maps);
        Ok(saved)
    }

    /// Writes, replaces or removes the merchant's maps row.
    async fn save_maps(unit: &dyn UnitOfWork, merchant_id: &str, maps: Option<&Maps>) -> Result<()> {
        match maps {
            Some(maps) => {
                unit.save_maps(merchant_id, maps)
                    .await
                    .map_err(persistence("merchant maps"))?;
            }
            None => unit
                .delete_maps(merchant_id)
                .await
                .map_err(persistence("merchant maps"))?,
        }
        Ok(())
    }

    async fn save_documents(
        &self,
        unit: Arc<dyn UnitOfWork>,
        merchant_id: &str,
        actor: &Actor,
        inputs: Vec<DocumentInput>,
        pending_upgrade: bool,
    ) -> Result<Vec<MerchantDocument>> {
        self.documents
            .process(unit, merchant_id, actor, inputs, pending_upgrade)
            .await
            .map_err(persistence("merchant documents"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_hides_storage_cause() {
        let mapped = persistence("merchant")(MerchantError::StorageError("disk full".into()));
        assert_eq!(mapped.to_string(), "failed to save merchant");
        assert_eq!(mapped.status_code(), 500);
    }

    #[test]
    fn test_persistence_keeps_domain_errors() {
        let mapped = persistence("merchant")(MerchantError::validation("bad"));
        assert!(matches!(mapped, MerchantError::ValidationError(_)));
        let mapped = persistence("merchant")(MerchantError::Conflict {
            id: "M1".into(),
            expected: 1,
            found: 2,
        });
        assert!(mapped.is_retryable());
    }
}
