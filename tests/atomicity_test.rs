mod common;

use common::{Harness, admin, harness, owner, registration};
use merchantflow::application::workflow::{Registration, Rejection, Rename};
use merchantflow::domain::document::DocumentInput;
use merchantflow::domain::merchant::{Maps, MerchantType, UpgradeStatus};
use merchantflow::domain::ports::{DocumentStore, OutboxStore};
use merchantflow::error::MerchantError;
use rand::Rng;
use rust_decimal_macros::dec;

fn full_registration(suffix: &str) -> Registration {
    Registration {
        is_active: true,
        maps: Some(Maps {
            latitude: dec!(-7.2575),
            longitude: dec!(112.7521),
            label: "Surabaya".into(),
        }),
        documents: vec![
            DocumentInput::new("KTP", format!("docs/{suffix}-ktp.png")),
            DocumentInput::new("NPWP", format!("docs/{suffix}-npwp.png")),
            DocumentInput::new("SIUP", format!("docs/{suffix}-siup.png")),
        ],
        ..registration(suffix)
    }
}

/// Writes one operation stages, measured on a clean run.
async fn writes_of_registration(h: &Harness) -> usize {
    h.store.faults().clear();
    h.workflow
        .register(&owner(), full_registration("baseline"))
        .await
        .unwrap();
    h.settle().await;
    h.store.faults().writes()
}

#[tokio::test]
async fn test_register_is_all_or_nothing() {
    let h = harness();
    let writes = writes_of_registration(&h).await;
    // merchant, maps, three documents, audit, event and activation email
    assert_eq!(writes, 8);

    for index in 0..writes {
        let suffix = format!("fail{index}");
        h.store.faults().fail_write_at(index);

        let result = h.workflow.register(&owner(), full_registration(&suffix)).await;

        match result {
            Err(MerchantError::PersistenceError(_)) => {}
            other => panic!("write {index}: expected persistence error, got {other:?}"),
        }
        let missing = h.workflow.merchant_by_url(&format!("toko-{suffix}")).await;
        assert!(matches!(missing, Err(MerchantError::NotFound { .. })));
        let orphan = DocumentStore::find_by_value(h.store.as_ref(), &format!("docs/{suffix}-ktp.png"))
            .await
            .unwrap();
        assert!(orphan.is_none(), "write {index}: document leaked");
        assert_eq!(h.store.stats().open(), 0);
    }

    h.settle().await;
    assert!(h.store.pending().await.unwrap().is_empty());
    assert_eq!(h.workflow.list_merchants().await.unwrap().len(), 1);
    // only the baseline registration produced side effects
    assert_eq!(h.services.mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_reject_upgrade_rolls_back_at_random_write() {
    let h = harness();
    let mut rng = rand::thread_rng();

    for round in 0..5 {
        let pending = h.register_pending(&format!("r{round}"), MerchantType::Manage).await;
        let id = pending.merchant.id.clone();
        let resets_before = h.store.stats().document_resets;
        // merchant, document reset, then three outbox records
        let index = rng.gen_range(0..5);
        h.store.faults().fail_write_at(index);

        let result = h
            .workflow
            .reject_upgrade(
                &admin(),
                Rejection {
                    merchant_id: id.clone(),
                    reason: "unreadable".into(),
                },
            )
            .await;

        assert!(result.is_err(), "round {round}: write {index} should fail");
        let stored = h.workflow.get_merchant(&id).await.unwrap();
        assert_eq!(stored.merchant.upgrade_status, UpgradeStatus::PendingManage);
        assert_eq!(stored.merchant.version, pending.merchant.version);
        assert!(stored.documents.iter().all(|d| d.is_pending_upgrade));
        assert!(h.store.stats().document_resets <= resets_before + 1);
        assert_eq!(h.store.stats().open(), 0);
    }
    h.store.faults().clear();
}

#[tokio::test]
async fn test_failed_rename_keeps_budget() {
    let h = harness();
    let created = h.register("a").await;
    let id = created.merchant.id.clone();

    h.store.faults().fail_write_at(0);
    let failed = h
        .workflow
        .rename(
            &owner(),
            Rename {
                merchant_id: id.clone(),
                merchant_name: "Toko Baru".into(),
            },
        )
        .await;
    assert!(matches!(failed, Err(MerchantError::PersistenceError(_))));

    let stored = h.workflow.get_merchant(&id).await.unwrap().merchant;
    assert_eq!(stored.count_update_name_available, 1);
    assert_eq!(stored.merchant_name, "Toko a");

    let renamed = h
        .workflow
        .rename(
            &owner(),
            Rename {
                merchant_id: id.clone(),
                merchant_name: "Toko Baru".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.merchant.merchant_name, "Toko Baru");
    assert_eq!(renamed.merchant.count_update_name_available, 0);
    let stats = h.store.stats();
    assert_eq!(stats.open(), 0);
    assert!(stats.rolled_back >= 1);
}
