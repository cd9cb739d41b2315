//! Tier upgrade requests and their outcome.

use super::lifecycle::Rejection;
use super::{MerchantSnapshot, MerchantWorkflow, RequestContext, audit, email, event, persistence};
use crate::domain::document::DocumentInput;
use crate::domain::effects::{EmailKind, EventKind};
use crate::domain::merchant::MerchantType;
use crate::domain::rules;
use crate::domain::validation;
use crate::error::{MerchantError, Result};
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeRequest {
    pub merchant_id: String,
    pub merchant_type: MerchantType,
    /// Filed with the request and marked pending until it is decided.
    #[serde(default)]
    pub documents: Vec<DocumentInput>,
}

impl MerchantWorkflow {
    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id, tier = %input.merchant_type))]
    pub async fn request_upgrade(
        &self,
        ctx: &RequestContext,
        input: UpgradeRequest,
    ) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.request_upgrade_inner(ctx, input))
            .await
    }

    async fn request_upgrade_inner(
        &self,
        ctx: &RequestContext,
        input: UpgradeRequest,
    ) -> Result<MerchantSnapshot> {
        let old = self.load_merchant(&input.merchant_id).await?;
        let upgrade_status = rules::request_upgrade(old.upgrade_status, input.merchant_type)?;

        let mut merchant = old.clone();
        merchant.upgrade_status = upgrade_status;
        merchant.reason.clear();
        merchant.touch(&ctx.actor, Utc::now());
        let actor = &ctx.actor;
        let documents = input.documents;

        self.execute("request_upgrade", |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(old.version)).await?;
            let documents = self
                .save_documents(unit, &saved.id, actor, documents, true)
                .await?;
            let effects = vec![
                email(EmailKind::UpgradeRequested, &saved, actor),
                audit("merchant.request_upgrade", &saved.id, Some(&old), Some(&saved), actor)?,
                event(EventKind::Updated, &saved)?,
            ];
            Ok::<_, MerchantError>((
                MerchantSnapshot {
                    merchant: saved,
                    documents,
                },
                effects,
            ))
        })
        .await
    }

    /// Rejects the pending upgrade: the merchant drops back to the base tier
    /// and its documents lose the pending marker.
    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id))]
    pub async fn reject_upgrade(
        &self,
        ctx: &RequestContext,
        input: Rejection,
    ) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.reject_upgrade_inner(ctx, input))
            .await
    }

    async fn reject_upgrade_inner(
        &self,
        ctx: &RequestContext,
        input: Rejection,
    ) -> Result<MerchantSnapshot> {
        let old = self.load_merchant(&input.merchant_id).await?;
        let upgrade_status = rules::reject_upgrade(old.upgrade_status)?;
        validation::required("reason", &input.reason)?;

        let mut merchant = old.clone();
        merchant.upgrade_status = upgrade_status;
        merchant.merchant_type = MerchantType::Regular;
        merchant.reason = input.reason;
        merchant.touch(&ctx.actor, Utc::now());
        let actor = &ctx.actor;

        self.execute("reject_upgrade", |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(old.version)).await?;
            let reset = unit
                .reset_pending_documents(&saved.id)
                .await
                .map_err(persistence("merchant documents"))?;
            tracing::debug!(reset, "pending upgrade documents released");

            let effects = vec![
                email(EmailKind::UpgradeRejected, &saved, actor),
                audit("merchant.reject_upgrade", &saved.id, Some(&old), Some(&saved), actor)?,
                event(EventKind::Updated, &saved)?,
            ];
            Ok::<_, MerchantError>((
                MerchantSnapshot {
                    merchant: saved,
                    documents: Vec::new(),
                },
                effects,
            ))
        })
        .await
    }

    /// Lets a merchant dismiss a rejected upgrade so it can file a new one.
    #[tracing::instrument(skip_all, fields(merchant_id = %merchant_id))]
    pub async fn clear_rejected_upgrade(
        &self,
        ctx: &RequestContext,
        merchant_id: &str,
    ) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.clear_rejected_upgrade_inner(ctx, merchant_id))
            .await
    }

    async fn clear_rejected_upgrade_inner(
        &self,
        ctx: &RequestContext,
        merchant_id: &str,
    ) -> Result<MerchantSnapshot> {
        let old = self.load_merchant(merchant_id).await?;
        let upgrade_status = rules::clear_rejected_upgrade(old.upgrade_status)?;

        let mut merchant = old.clone();
        merchant.upgrade_status = upgrade_status;
        merchant.reason.clear();
        merchant.touch(&ctx.actor, Utc::now());
        let actor = &ctx.actor;

        self.execute("clear_rejected_upgrade", |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(old.version)).await?;
            let effects = vec![
                audit("merchant.clear_rejected_upgrade", &saved.id, Some(&old), Some(&saved), actor)?,
                event(EventKind::Updated, &saved)?,
            ];
            Ok::<_, MerchantError>((
                MerchantSnapshot {
                    merchant: saved,
                    documents: Vec::new(),
                },
                effects,
            ))
        })
        .await
    }
}
