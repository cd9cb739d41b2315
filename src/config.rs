//! Workflow configuration.
//!
//! Template ids and attachment URLs are looked up by named keys. The map is
//! injected at construction so workflows never read process-global state.

use crate::error::{MerchantError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Number of concurrent document workers per fan-out call.
pub const DEFAULT_DOCUMENT_WORKERS: usize = 10;
/// Attempts made for one email delivery before giving up.
pub const DEFAULT_EMAIL_ATTEMPTS: u32 = 3;
/// Constant delay between email delivery attempts.
pub const DEFAULT_EMAIL_BACKOFF: Duration = Duration::from_millis(500);

/// Recognised configuration keys.
pub mod keys {
    /// Template sent when a merchant becomes active.
    pub const TEMPLATE_MERCHANT_ACTIVATED: &str = "TEMPLATE_ID_MERCHANT_ACTIVATED";
    /// Template sent when an upgrade request is approved.
    pub const TEMPLATE_UPGRADE_APPROVED: &str = "TEMPLATE_ID_MERCHANT_UPGRADE_APPROVED";
    /// Template sent to the merchant when an upgrade request is filed.
    pub const TEMPLATE_UPGRADE_REQUESTED: &str = "TEMPLATE_ID_MERCHANT_UPGRADE_REQUESTED";
    /// Template sent when an upgrade request is rejected.
    pub const TEMPLATE_UPGRADE_REJECTED: &str = "TEMPLATE_ID_MERCHANT_UPGRADE_REJECTED";
    /// Template sent when a registration is rejected.
    pub const TEMPLATE_REGISTRATION_REJECTED: &str = "TEMPLATE_ID_MERCHANT_REGISTRATION_REJECTED";
    /// Template sent to a newly invited employee.
    pub const TEMPLATE_EMPLOYEE_INVITED: &str = "TEMPLATE_ID_MERCHANT_EMPLOYEE_INVITED";
    /// Attachment (guide PDF) added to merchant activation emails.
    pub const ATTACHMENT_MERCHANT_GUIDE: &str = "ATTACHMENT_URL_MERCHANT_GUIDE";
    /// Dashboard URL substituted for `{{url}}` in templates.
    pub const MERCHANT_DASHBOARD_URL: &str = "MERCHANT_DASHBOARD_URL";
    /// Object storage prefix stripped from document values before storing.
    pub const STORAGE_BASE_URL: &str = "STORAGE_BASE_URL";

    pub const ALL: [&str; 9] = [
        TEMPLATE_MERCHANT_ACTIVATED,
        TEMPLATE_UPGRADE_APPROVED,
        TEMPLATE_UPGRADE_REQUESTED,
        TEMPLATE_UPGRADE_REJECTED,
        TEMPLATE_REGISTRATION_REJECTED,
        TEMPLATE_EMPLOYEE_INVITED,
        ATTACHMENT_MERCHANT_GUIDE,
        MERCHANT_DASHBOARD_URL,
        STORAGE_BASE_URL,
    ];
}

/// How merchant saves treat the carried version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// The version is bumped but never compared; the last writer wins.
    #[default]
    LastWriteWins,
    /// A save fails with a conflict when the stored version moved on.
    Optimistic,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    values: HashMap<String, String>,
    pub document_workers: usize,
    pub email_attempts: u32,
    pub email_backoff: Duration,
    pub concurrency: ConcurrencyMode,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            document_workers: DEFAULT_DOCUMENT_WORKERS,
            email_attempts: DEFAULT_EMAIL_ATTEMPTS,
            email_backoff: DEFAULT_EMAIL_BACKOFF,
            concurrency: ConcurrencyMode::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots every recognised key from the process environment.
    ///
    /// `MERCHANTFLOW_DOCUMENT_WORKERS` overrides the worker count and
    /// `MERCHANTFLOW_OPTIMISTIC_LOCK=1` switches to optimistic saves.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for key in keys::ALL {
            if let Ok(value) = std::env::var(key) {
                config.values.insert(key.to_string(), value);
            }
        }
        if let Some(workers) = std::env::var("MERCHANTFLOW_DOCUMENT_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|w| *w > 0)
        {
            config.document_workers = workers;
        }
        if std::env::var("MERCHANTFLOW_OPTIMISTIC_LOCK").is_ok_and(|v| v == "1") {
            config.concurrency = ConcurrencyMode::Optimistic;
        }
        config
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn with_document_workers(mut self, workers: usize) -> Self {
        self.document_workers = workers.max(1);
        self
    }

    pub fn with_email_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.email_attempts = attempts.max(1);
        self.email_backoff = backoff;
        self
    }

    pub fn with_concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns the value for a key the current code path cannot do without.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            MerchantError::validation(format!("missing configuration key {key}"))
        })
    }

    /// Reduces a document URL to its object-storage path.
    pub fn storage_path(&self, value: &str) -> String {
        let value = value.trim();
        match self.get(keys::STORAGE_BASE_URL) {
            Some(base) => value
                .strip_prefix(base)
                .map(|path| path.trim_start_matches('/').to_string())
                .unwrap_or_else(|| value.to_string()),
            None => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_missing_key() {
        let config = WorkflowConfig::new();
        let err = config.require(keys::TEMPLATE_UPGRADE_APPROVED).unwrap_err();
        assert!(matches!(err, MerchantError::ValidationError(_)));
        assert!(err.to_string().contains(keys::TEMPLATE_UPGRADE_APPROVED));
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let config = WorkflowConfig::new().with(keys::MERCHANT_DASHBOARD_URL, "");
        assert!(config.get(keys::MERCHANT_DASHBOARD_URL).is_none());
    }

    #[test]
    fn test_storage_path_strips_base() {
        let config =
            WorkflowConfig::new().with(keys::STORAGE_BASE_URL, "https://cdn.example.com");
        assert_eq!(
            config.storage_path("https://cdn.example.com/docs/ktp.png"),
            "docs/ktp.png"
        );
        assert_eq!(config.storage_path("docs/npwp.png"), "docs/npwp.png");
    }

    #[test]
    fn test_worker_count_never_zero() {
        let config = WorkflowConfig::new().with_document_workers(0);
        assert_eq!(config.document_workers, 1);
    }
}
