mod common;

use common::{Harness, admin, harness, owner};
use merchantflow::application::workflow::{AdminUpdate, Rejection, UpgradeRequest};
use merchantflow::domain::merchant::{MerchantType, UpgradeStatus};
use merchantflow::error::MerchantError;

/// Drives a fresh merchant into the given upgrade status through the
/// public operations.
async fn merchant_in(h: &Harness, suffix: &str, status: UpgradeStatus) -> String {
    let id = h.register(suffix).await.merchant.id;
    let request = |tier| UpgradeRequest {
        merchant_id: id.clone(),
        merchant_type: tier,
        documents: Vec::new(),
    };
    let reject = || Rejection {
        merchant_id: id.clone(),
        reason: "not yet".into(),
    };
    let wf = &h.workflow;
    match status {
        UpgradeStatus::None => {}
        UpgradeStatus::PendingManage => {
            wf.request_upgrade(&owner(), request(MerchantType::Manage)).await.unwrap();
        }
        UpgradeStatus::PendingAssociate => {
            wf.request_upgrade(&owner(), request(MerchantType::Associate)).await.unwrap();
        }
        UpgradeStatus::RejectManage => {
            wf.request_upgrade(&owner(), request(MerchantType::Manage)).await.unwrap();
            wf.reject_upgrade(&admin(), reject()).await.unwrap();
        }
        UpgradeStatus::RejectAssociate => {
            wf.request_upgrade(&owner(), request(MerchantType::Associate)).await.unwrap();
            wf.reject_upgrade(&admin(), reject()).await.unwrap();
        }
        UpgradeStatus::Active => {
            wf.request_upgrade(&owner(), request(MerchantType::Manage)).await.unwrap();
            wf.approve(
                &admin(),
                AdminUpdate {
                    merchant_id: id.clone(),
                    is_active: true,
                    approve_upgrade: true,
                    ..AdminUpdate::default()
                },
            )
            .await
            .unwrap();
        }
    }
    h.settle().await;
    assert_eq!(wf.get_merchant(&id).await.unwrap().merchant.upgrade_status, status);
    id
}

async fn assert_unchanged(h: &Harness, id: &str, status: UpgradeStatus, version: u64) {
    let stored = h.workflow.get_merchant(id).await.unwrap().merchant;
    assert_eq!(stored.upgrade_status, status);
    assert_eq!(stored.version, version);
}

#[tokio::test]
async fn test_request_upgrade_table() {
    use UpgradeStatus::*;
    let table = [
        (None, Some(PendingManage)),
        (PendingManage, Option::None),
        (PendingAssociate, Option::None),
        (Active, Option::None),
        (RejectManage, Some(PendingManage)),
        (RejectAssociate, Some(PendingManage)),
    ];
    let h = harness();
    for (i, (from, expected)) in table.into_iter().enumerate() {
        let id = merchant_in(&h, &format!("req{i}"), from).await;
        let version = h.workflow.get_merchant(&id).await.unwrap().merchant.version;
        let result = h
            .workflow
            .request_upgrade(
                &owner(),
                UpgradeRequest {
                    merchant_id: id.clone(),
                    merchant_type: MerchantType::Manage,
                    documents: Vec::new(),
                },
            )
            .await;
        match expected {
            Some(to) => {
                let snapshot = result.unwrap();
                assert_eq!(snapshot.merchant.upgrade_status, to, "from {from:?}");
                assert!(snapshot.merchant.reason.is_empty());
            }
            Option::None => {
                assert!(
                    matches!(result, Err(MerchantError::ValidationError(_))),
                    "from {from:?}"
                );
                assert_unchanged(&h, &id, from, version).await;
            }
        }
    }
}

#[tokio::test]
async fn test_request_regular_tier_is_refused() {
    let h = harness();
    let id = merchant_in(&h, "a", UpgradeStatus::None).await;
    let result = h
        .workflow
        .request_upgrade(
            &owner(),
            UpgradeRequest {
                merchant_id: id.clone(),
                merchant_type: MerchantType::Regular,
                documents: Vec::new(),
            },
        )
        .await;
    assert!(matches!(result, Err(MerchantError::ValidationError(_))));
}

#[tokio::test]
async fn test_reject_upgrade_table() {
    use UpgradeStatus::*;
    let table = [
        (None, Option::None),
        (PendingManage, Some(RejectManage)),
        (PendingAssociate, Some(RejectAssociate)),
        (Active, Option::None),
        (RejectManage, Option::None),
        (RejectAssociate, Option::None),
    ];
    let h = harness();
    for (i, (from, expected)) in table.into_iter().enumerate() {
        let id = merchant_in(&h, &format!("rej{i}"), from).await;
        let version = h.workflow.get_merchant(&id).await.unwrap().merchant.version;
        let result = h
            .workflow
            .reject_upgrade(
                &admin(),
                Rejection {
                    merchant_id: id.clone(),
                    reason: "expired license".into(),
                },
            )
            .await;
        match expected {
            Some(to) => {
                let snapshot = result.unwrap();
                assert_eq!(snapshot.merchant.upgrade_status, to, "from {from:?}");
                assert_eq!(snapshot.merchant.merchant_type, MerchantType::Regular);
            }
            Option::None => {
                assert!(result.is_err(), "from {from:?}");
                assert_unchanged(&h, &id, from, version).await;
            }
        }
    }
}

#[tokio::test]
async fn test_clear_rejected_upgrade_table() {
    use UpgradeStatus::*;
    let table = [
        (None, false),
        (PendingManage, false),
        (PendingAssociate, false),
        (Active, false),
        (RejectManage, true),
        (RejectAssociate, true),
    ];
    let h = harness();
    for (i, (from, allowed)) in table.into_iter().enumerate() {
        let id = merchant_in(&h, &format!("clr{i}"), from).await;
        let version = h.workflow.get_merchant(&id).await.unwrap().merchant.version;
        let result = h.workflow.clear_rejected_upgrade(&owner(), &id).await;
        if allowed {
            let snapshot = result.unwrap();
            assert_eq!(snapshot.merchant.upgrade_status, None);
            assert!(snapshot.merchant.reason.is_empty());
        } else {
            assert!(result.is_err(), "from {from:?}");
            assert_unchanged(&h, &id, from, version).await;
        }
    }
}
