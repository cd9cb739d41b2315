mod common;

use common::{config, harness, harness_with, owner, registration, templates};
use merchantflow::application::dispatcher::REPUBLISH_EVENT_JOB;
use merchantflow::application::workflow::{MerchantWorkflow, Registration};
use merchantflow::config::ConcurrencyMode;
use merchantflow::domain::ports::{OutboxStore, Stores};
use merchantflow::infrastructure::notify::{InMemoryMailer, InMemoryServices};
use std::sync::Arc;
use std::time::Duration;

fn active(suffix: &str) -> Registration {
    Registration {
        is_active: true,
        ..registration(suffix)
    }
}

#[tokio::test]
async fn test_undelivered_email_is_replayed_after_restart() {
    let config = config().with_email_retry(2, Duration::from_millis(1));
    let h = harness_with(config, InMemoryMailer::failing(10), ConcurrencyMode::LastWriteWins);

    let created = h.workflow.register(&owner(), active("a")).await.unwrap();
    h.settle().await;

    // the operation succeeded even though its email did not go out
    assert!(created.merchant.is_active);
    assert_eq!(h.services.mailer.attempts(), 2);
    assert!(h.services.mailer.sent().is_empty());
    let pending = h.store.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, "register");

    // a new process over the same store, with a working relay
    let services = InMemoryServices::new(InMemoryMailer::new(), templates());
    let restarted = MerchantWorkflow::new(
        Stores::from_backend(Arc::clone(&h.store)),
        services.services(),
        common::config(),
    );
    assert_eq!(restarted.dispatcher().drain_pending().await.unwrap(), 1);
    restarted.dispatcher().shutdown().await;

    let sent = services.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "toko-a@example.com");
    assert!(h.store.pending().await.unwrap().is_empty());
    assert_eq!(restarted.dispatcher().drain_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unavailable_bus_falls_back_to_job() {
    let h = harness();
    h.services.events.set_unavailable(true);

    let created = h.register("a").await;

    assert!(h.services.events.published().is_empty());
    let jobs = h.services.events.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_name, REPUBLISH_EVENT_JOB);
    assert_eq!(jobs[0].target_id, created.merchant.id);
    assert_eq!(jobs[0].payload["merchant_url"], "toko-a");
    assert!(h.store.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_every_committed_effect_is_delivered_once() {
    let h = harness();
    for suffix in ["a", "b", "c"] {
        h.workflow.register(&owner(), active(suffix)).await.unwrap();
    }
    h.settle().await;
    // nothing left to replay, so a second drain delivers nothing new
    assert_eq!(h.workflow.dispatcher().drain_pending().await.unwrap(), 0);
    h.settle().await;

    assert_eq!(h.services.mailer.sent().len(), 3);
    assert_eq!(h.services.events.published().len(), 3);
    let actions: Vec<String> = h
        .services
        .audit
        .entries()
        .into_iter()
        .map(|e| e.metadata.action)
        .collect();
    assert_eq!(actions, vec!["merchant.register"; 3]);
    assert_eq!(h.workflow.dispatcher().in_flight(), 0);
}

#[tokio::test]
async fn test_missing_template_keeps_record_pending() {
    let config = merchantflow::config::WorkflowConfig::new();
    let h = harness_with(config, InMemoryMailer::new(), ConcurrencyMode::LastWriteWins);

    h.workflow.register(&owner(), active("a")).await.unwrap();
    h.settle().await;

    assert_eq!(h.services.mailer.attempts(), 0);
    let pending = h.store.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].effect.name(), "email");
}
