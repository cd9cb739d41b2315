//! Delivery of committed side effects.
//!
//! Operations hand their committed outbox records to the [`Dispatcher`] and
//! return. Each record is delivered on its own tracked task; failures are
//! logged and leave the record pending so [`Dispatcher::drain_pending`] can
//! replay it. Nothing here can undo a commit.

use super::template::{self, TemplateValues};
use crate::config::{WorkflowConfig, keys};
use crate::domain::effects::{AuditMetadata, EmailIntent, EmailPayload, OutboxRecord, SideEffect};
use crate::domain::ports::{OutboxStore, Services};
use crate::error::Result;
use chrono::{Datelike, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;

/// Job name used when an event could not be published directly.
pub const REPUBLISH_EVENT_JOB: &str = "republish_event";

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    services: Services,
    outbox: Arc<dyn OutboxStore>,
    config: Arc<WorkflowConfig>,
    tasks: Mutex<JoinSet<()>>,
    in_flight: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    pub fn new(
        services: Services,
        outbox: Arc<dyn OutboxStore>,
        config: Arc<WorkflowConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                services,
                outbox,
                config,
                tasks: Mutex::new(JoinSet::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Spawns one delivery task per record and returns immediately.
    ///
    /// Records already being delivered are skipped. Must be called from
    /// within a Tokio runtime.
    pub fn dispatch(&self, records: Vec<OutboxRecord>) {
        let mut tasks = lock(&self.inner.tasks);
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::error!(error = %e, "side effect task aborted");
            }
        }
        for record in records {
            if record.dispatched || !lock(&self.inner.in_flight).insert(record.id.clone()) {
                tracing::debug!(record_id = %record.id, "record already delivered or in flight");
                continue;
            }
            let inner = Arc::clone(&self.inner);
            tasks.spawn(async move {
                let id = record.id.clone();
                inner.deliver(record).await;
                lock(&inner.in_flight).remove(&id);
            });
        }
    }

    /// Re-dispatches every outbox record that was never marked delivered.
    pub async fn drain_pending(&self) -> Result<usize> {
        let pending = self.inner.outbox.pending().await?;
        let count = pending.len();
        if count > 0 {
            tracing::info!(count, "replaying pending side effects");
        }
        self.dispatch(pending);
        Ok(count)
    }

    /// Tasks spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    /// Waits for every tracked task, including ones spawned while waiting.
    pub async fn shutdown(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.inner.tasks));
            if tasks.is_empty() {
                break;
            }
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "side effect task aborted");
                }
            }
        }
    }
}

impl Inner {
    async fn deliver(&self, record: OutboxRecord) {
        let outcome = match &record.effect {
            SideEffect::Email(intent) => self.send_email(intent).await,
            SideEffect::Audit {
                action,
                target_id,
                before,
                after,
                actor,
            } => {
                let metadata = AuditMetadata {
                    action: action.clone(),
                    target_id: target_id.clone(),
                    actor_id: actor.user_id.clone(),
                    actor_name: actor.name.clone(),
                    ip: actor.ip.clone(),
                };
                self.services
                    .audit
                    .insert_log(before.as_ref(), after.as_ref(), &metadata)
                    .await
            }
            SideEffect::Event { kind, key, payload } => {
                if let Err(e) = self.services.events.publish(kind.topic(), key, payload).await {
                    tracing::warn!(topic = kind.topic(), key = %key, error = %e, "publish failed, queueing job");
                    self.services
                        .events
                        .enqueue_job(payload, key, REPUBLISH_EVENT_JOB)
                        .await;
                }
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.outbox.mark_dispatched(&record.id).await {
                    tracing::warn!(record_id = %record.id, error = %e, "failed to mark side effect delivered");
                }
            }
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    operation = %record.operation,
                    effect = record.effect.name(),
                    error = %e,
                    "side effect failed"
                );
            }
        }
    }

    async fn send_email(&self, intent: &EmailIntent) -> Result<()> {
        let template_id = self.config.require(intent.kind.template_key())?;
        let template = self.services.templates.template_by_id(template_id).await?;
        let url = self.config.get(keys::MERCHANT_DASHBOARD_URL).unwrap_or_default();
        let values = TemplateValues::from_intent(intent, url, Utc::now().year());

        let payload = EmailPayload {
            to: intent.to.clone(),
            subject: intent.kind.subject().to_string(),
            body: template::render(&template.content, &values),
            attachments: intent
                .kind
                .attachment_key()
                .and_then(|key| self.config.get(key))
                .map(|url| vec![url.to_string()])
                .unwrap_or_default(),
        };

        let attempts = self.config.email_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.services.email.send_email(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    tracing::warn!(to = %payload.to, attempt, error = %e, "email delivery failed, retrying");
                    tokio::time::sleep(self.config.email_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::effects::{EmailKind, EventKind};
    use crate::domain::merchant::{Actor, UpgradeStatus};
    use crate::domain::ports::TransactionManager;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::infrastructure::notify::{InMemoryMailer, InMemoryServices, InMemoryTemplates};
    use serde_json::json;
    use std::time::Duration;

    fn config() -> WorkflowConfig {
        WorkflowConfig::new()
            .with(keys::TEMPLATE_MERCHANT_ACTIVATED, "tpl-activated")
            .with(keys::ATTACHMENT_MERCHANT_GUIDE, "https://cdn.example.com/guide.pdf")
            .with(keys::MERCHANT_DASHBOARD_URL, "https://seller.example.com")
            .with_email_retry(3, Duration::from_millis(1))
    }

    fn activation_email() -> SideEffect {
        SideEffect::Email(EmailIntent {
            kind: EmailKind::MerchantActivated,
            to: "shop@example.com".into(),
            merchant_name: "Toko".into(),
            full_name: "Budi".into(),
            upgrade_status: UpgradeStatus::None,
            reason: String::new(),
            admin_name: "Admin".into(),
        })
    }

    async fn committed(store: &InMemoryStore, effects: Vec<SideEffect>) -> Vec<OutboxRecord> {
        let unit = store.begin().await.unwrap();
        let mut records = Vec::new();
        for effect in effects {
            let record = OutboxRecord::new("test", effect, Utc::now());
            unit.enqueue_outbox(&record).await.unwrap();
            records.push(record);
        }
        unit.commit().await.unwrap();
        records
    }

    fn harness(mailer: InMemoryMailer) -> (Arc<InMemoryStore>, InMemoryServices, Dispatcher) {
        let store = Arc::new(InMemoryStore::in_memory());
        let templates =
            InMemoryTemplates::new().with("tpl-activated", "Hi {{fullName}}, {{merchantName}} is live at {{url}}");
        let services = InMemoryServices::new(mailer, templates);
        let dispatcher = Dispatcher::new(services.services(), store.clone(), Arc::new(config()));
        (store, services, dispatcher)
    }

    #[tokio::test]
    async fn test_email_rendered_with_attachment() {
        let (store, services, dispatcher) = harness(InMemoryMailer::new());
        let records = committed(&store, vec![activation_email()]).await;
        dispatcher.dispatch(records);
        dispatcher.shutdown().await;

        let sent = services.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Hi Budi, Toko is live at https://seller.example.com");
        assert_eq!(sent[0].attachments, vec!["https://cdn.example.com/guide.pdf"]);
        assert!(store.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_email_retried_until_delivered() {
        let (store, services, dispatcher) = harness(InMemoryMailer::failing(2));
        dispatcher.dispatch(committed(&store, vec![activation_email()]).await);
        dispatcher.shutdown().await;

        assert_eq!(services.mailer.attempts(), 3);
        assert_eq!(services.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_email_stays_pending_and_replays() {
        let (store, services, dispatcher) = harness(InMemoryMailer::failing(3));
        dispatcher.dispatch(committed(&store, vec![activation_email()]).await);
        dispatcher.shutdown().await;
        assert!(services.mailer.sent().is_empty());
        assert_eq!(store.pending().await.unwrap().len(), 1);

        assert_eq!(dispatcher.drain_pending().await.unwrap(), 1);
        dispatcher.shutdown().await;
        assert_eq!(services.mailer.sent().len(), 1);
        assert!(store.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_key_is_logged_not_fatal() {
        let store = Arc::new(InMemoryStore::in_memory());
        let services = InMemoryServices::default();
        let dispatcher =
            Dispatcher::new(services.services(), store.clone(), Arc::new(WorkflowConfig::new()));
        dispatcher.dispatch(committed(&store, vec![activation_email()]).await);
        dispatcher.shutdown().await;

        assert_eq!(services.mailer.attempts(), 0);
        assert_eq!(store.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_audit_and_event_delivered_once() {
        let (store, services, dispatcher) = harness(InMemoryMailer::new());
        let effects = vec![
            SideEffect::Audit {
                action: "merchant.update".into(),
                target_id: "M1".into(),
                before: Some(json!({"status": "NEW"})),
                after: Some(json!({"status": "ACTIVE"})),
                actor: Actor::system(),
            },
            SideEffect::Event {
                kind: EventKind::Updated,
                key: "M1".into(),
                payload: json!({"id": "M1"}),
            },
        ];
        let records = committed(&store, effects).await;
        dispatcher.dispatch(records.clone());
        dispatcher.dispatch(records);
        dispatcher.shutdown().await;

        assert_eq!(services.audit.entries().len(), 1);
        let published = services.events.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "merchant.updated");
    }

    #[tokio::test]
    async fn test_unavailable_bus_falls_back_to_job() {
        let (store, services, dispatcher) = harness(InMemoryMailer::new());
        services.events.set_unavailable(true);
        let effect = SideEffect::Event {
            kind: EventKind::Deleted,
            key: "M1".into(),
            payload: json!({"id": "M1"}),
        };
        dispatcher.dispatch(committed(&store, vec![effect]).await);
        dispatcher.shutdown().await;

        assert!(services.events.published().is_empty());
        let jobs = services.events.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_name, REPUBLISH_EVENT_JOB);
        assert_eq!(jobs[0].target_id, "M1");
    }
}
