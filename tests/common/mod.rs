#![allow(dead_code)]

use merchantflow::application::workflow::{
    MerchantSnapshot, MerchantWorkflow, Registration, RequestContext, UpgradeRequest,
};
use merchantflow::config::{ConcurrencyMode, WorkflowConfig, keys};
use merchantflow::domain::document::DocumentInput;
use merchantflow::domain::merchant::{Actor, MerchantType};
use merchantflow::domain::ports::Stores;
use merchantflow::infrastructure::in_memory::InMemoryStore;
use merchantflow::infrastructure::notify::{InMemoryMailer, InMemoryServices, InMemoryTemplates};
use std::sync::Arc;
use std::time::Duration;

pub const DASHBOARD_URL: &str = "https://merchant.example.com";
pub const STORAGE_BASE: &str = "https://cdn.example.com/";

/// A workflow over one in-memory store, with handles for inspection.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub services: InMemoryServices,
    pub workflow: MerchantWorkflow,
}

pub fn config() -> WorkflowConfig {
    WorkflowConfig::new()
        .with(keys::TEMPLATE_MERCHANT_ACTIVATED, "activated")
        .with(keys::TEMPLATE_UPGRADE_APPROVED, "approved")
        .with(keys::TEMPLATE_UPGRADE_REQUESTED, "requested")
        .with(keys::TEMPLATE_UPGRADE_REJECTED, "upgrade-rejected")
        .with(keys::TEMPLATE_REGISTRATION_REJECTED, "registration-rejected")
        .with(keys::TEMPLATE_EMPLOYEE_INVITED, "invited")
        .with(keys::ATTACHMENT_MERCHANT_GUIDE, "https://cdn.example.com/guide.pdf")
        .with(keys::MERCHANT_DASHBOARD_URL, DASHBOARD_URL)
        .with(keys::STORAGE_BASE_URL, STORAGE_BASE)
        .with_document_workers(4)
        .with_email_retry(3, Duration::from_millis(1))
}

pub fn templates() -> InMemoryTemplates {
    InMemoryTemplates::new()
        .with("activated", "Hi {{fullName}}, {{merchantName}} is active. {{url}}")
        .with("approved", "{{merchantName}} is now {{upgradeStatus}} by {{adminName}}")
        .with("requested", "{{merchantName}} asked for {{upgradeStatus}}")
        .with("upgrade-rejected", "{{merchantName}} upgrade rejected: {{reason}}")
        .with("registration-rejected", "{{merchantName}} rejected: {{reason}}")
        .with("invited", "Join {{merchantName}} at {{url}}")
}

pub fn harness() -> Harness {
    harness_with(config(), InMemoryMailer::new(), ConcurrencyMode::LastWriteWins)
}

pub fn optimistic_harness() -> Harness {
    let config = config().with_concurrency(ConcurrencyMode::Optimistic);
    harness_with(config, InMemoryMailer::new(), ConcurrencyMode::Optimistic)
}

pub fn harness_with(config: WorkflowConfig, mailer: InMemoryMailer, mode: ConcurrencyMode) -> Harness {
    let store = Arc::new(InMemoryStore::in_memory().with_concurrency(mode));
    let services = InMemoryServices::new(mailer, templates());
    let workflow = MerchantWorkflow::new(
        Stores::from_backend(Arc::clone(&store)),
        services.services(),
        config,
    );
    Harness {
        store,
        services,
        workflow,
    }
}

pub fn admin() -> RequestContext {
    RequestContext::new(Actor::new("admin-1", "Siti Admin", "10.0.0.1"))
}

pub fn owner() -> RequestContext {
    RequestContext::new(Actor::new("u1", "Budi", "10.0.0.2"))
}

pub fn registration(suffix: &str) -> Registration {
    Registration {
        member_id: format!("member-{suffix}"),
        merchant_name: format!("Toko {suffix}"),
        merchant_url: format!("toko-{suffix}"),
        merchant_email: format!("toko-{suffix}@example.com"),
        full_name: format!("Owner {suffix}"),
        ..Registration::default()
    }
}

impl Harness {
    /// Registers an inactive merchant and waits for its side effects.
    pub async fn register(&self, suffix: &str) -> MerchantSnapshot {
        let created = self
            .workflow
            .register(&owner(), registration(suffix))
            .await
            .unwrap();
        self.settle().await;
        created
    }

    /// Registers a merchant with a pending upgrade to `tier`.
    pub async fn register_pending(&self, suffix: &str, tier: MerchantType) -> MerchantSnapshot {
        let created = self.register(suffix).await;
        let pending = self
            .workflow
            .request_upgrade(
                &owner(),
                UpgradeRequest {
                    merchant_id: created.merchant.id.clone(),
                    merchant_type: tier,
                    documents: vec![DocumentInput::new("NPWP", format!("docs/{suffix}-npwp.png"))],
                },
            )
            .await
            .unwrap();
        self.settle().await;
        pending
    }

    /// Waits for every dispatched side effect to finish.
    pub async fn settle(&self) {
        self.workflow.dispatcher().shutdown().await;
    }

    pub fn email_subjects(&self) -> Vec<String> {
        self.services
            .mailer
            .sent()
            .into_iter()
            .map(|p| p.subject)
            .collect()
    }
}
