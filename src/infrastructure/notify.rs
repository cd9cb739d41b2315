//! In-process implementations of the external service ports. They log what
//! they receive and keep it for inspection.

use crate::domain::effects::{AuditMetadata, EmailPayload, Template};
use crate::domain::ports::{AuditLog, EmailSender, EventPublisher, Services, TemplateSource};
use crate::error::{MerchantError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn snapshot<T: Clone>(items: &Mutex<Vec<T>>) -> Vec<T> {
    items.lock().map(|v| v.clone()).unwrap_or_else(|e| e.into_inner().clone())
}

fn record<T>(items: &Mutex<Vec<T>>, item: T) {
    match items.lock() {
        Ok(mut v) => v.push(item),
        Err(e) => e.into_inner().push(item),
    }
}

/// Email sender that can be told to fail its first `n` attempts.
#[derive(Debug, Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<EmailPayload>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        let mailer = Self::default();
        mailer.failures_left.store(times, Ordering::SeqCst);
        mailer
    }

    pub fn sent(&self) -> Vec<EmailPayload> {
        snapshot(&self.sent)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for InMemoryMailer {
    async fn send_email(&self, payload: &EmailPayload) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MerchantError::StorageError(format!(
                "mail relay unavailable for {}",
                payload.to
            )));
        }
        tracing::info!(to = %payload.to, subject = %payload.subject, "email sent");
        record(&self.sent, payload.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTemplates {
    templates: Mutex<HashMap<String, String>>,
}

impl InMemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: &str, content: &str) -> Self {
        if let Ok(mut templates) = self.templates.lock() {
            templates.insert(id.to_string(), content.to_string());
        }
        self
    }
}

#[async_trait]
impl TemplateSource for InMemoryTemplates {
    async fn template_by_id(&self, id: &str) -> Result<Template> {
        let templates = self
            .templates
            .lock()
            .map_err(|_| MerchantError::StorageError("template registry poisoned".into()))?;
        templates
            .get(id)
            .map(|content| Template {
                id: id.to_string(),
                content: content.clone(),
            })
            .ok_or_else(|| MerchantError::not_found("template", id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job_name: String,
    pub target_id: String,
    pub payload: Value,
}

#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    published: Mutex<Vec<PublishedEvent>>,
    jobs: Mutex<Vec<QueuedJob>>,
    unavailable: AtomicBool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        snapshot(&self.published)
    }

    pub fn jobs(&self) -> Vec<QueuedJob> {
        snapshot(&self.jobs)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: &Value) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MerchantError::StorageError(format!(
                "event bus unavailable for {topic}"
            )));
        }
        tracing::debug!(topic, key, "event published");
        record(
            &self.published,
            PublishedEvent {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.clone(),
            },
        );
        Ok(())
    }

    async fn enqueue_job(&self, payload: &Value, target_id: &str, job_name: &str) {
        tracing::debug!(job_name, target_id, "job enqueued");
        record(
            &self.jobs,
            QueuedJob {
                job_name: job_name.to_string(),
                target_id: target_id.to_string(),
                payload: payload.clone(),
            },
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub metadata: AuditMetadata,
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        snapshot(&self.entries)
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn insert_log(
        &self,
        before: Option<&Value>,
        after: Option<&Value>,
        metadata: &AuditMetadata,
    ) -> Result<()> {
        tracing::debug!(action = %metadata.action, target = %metadata.target_id, "audit log");
        record(
            &self.entries,
            AuditEntry {
                before: before.cloned(),
                after: after.cloned(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }
}

/// All in-process services, kept as concrete handles for inspection.
#[derive(Clone, Default)]
pub struct InMemoryServices {
    pub mailer: Arc<InMemoryMailer>,
    pub templates: Arc<InMemoryTemplates>,
    pub events: Arc<InMemoryEventBus>,
    pub audit: Arc<InMemoryAuditLog>,
}

impl InMemoryServices {
    pub fn new(mailer: InMemoryMailer, templates: InMemoryTemplates) -> Self {
        Self {
            mailer: Arc::new(mailer),
            templates: Arc::new(templates),
            events: Arc::new(InMemoryEventBus::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            email: self.mailer.clone(),
            templates: self.templates.clone(),
            events: self.events.clone(),
            audit: self.audit.clone(),
        }
    }
}
