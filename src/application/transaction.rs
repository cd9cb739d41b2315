//! Scoped transactions.
//!
//! [`TransactionScope`] guarantees that every `begin` reaches exactly one of
//! commit or rollback: the explicit paths consume the scope, and a scope
//! dropped while still open (early return, panic, or the enclosing future
//! being cancelled) schedules its rollback on the runtime.

use crate::domain::ports::{TransactionManager, UnitOfWork};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;

pub struct TransactionScope {
    unit: Arc<dyn UnitOfWork>,
    open: bool,
}

impl TransactionScope {
    pub async fn begin(manager: &dyn TransactionManager) -> Result<Self> {
        let unit = manager.begin().await?;
        Ok(Self { unit, open: true })
    }

    /// Handle for issuing writes inside this scope.
    pub fn unit(&self) -> Arc<dyn UnitOfWork> {
        Arc::clone(&self.unit)
    }

    pub async fn commit(mut self) -> Result<()> {
        self.open = false;
        self.unit.commit().await
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.unit.rollback().await
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        tracing::warn!("transaction scope dropped while open, rolling back");
        let unit = Arc::clone(&self.unit);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = unit.rollback().await {
                        tracing::error!(error = %e, "rollback of abandoned transaction failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!("no runtime available to roll back abandoned transaction");
            }
        }
    }
}

/// Runs `work` inside a fresh scope: commit on `Ok`, rollback on `Err`.
///
/// A rollback failure is logged; the caller always sees the original error.
pub async fn run_in_transaction<T, F, Fut>(manager: &dyn TransactionManager, work: F) -> Result<T>
where
    F: FnOnce(Arc<dyn UnitOfWork>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let scope = TransactionScope::begin(manager).await?;
    match work(scope.unit()).await {
        Ok(value) => {
            scope.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = scope.rollback().await {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
