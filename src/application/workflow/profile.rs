//! Self-service edits made by the owning merchant.

use super::lifecycle::MAX_NAME_LEN;
use super::{MerchantSnapshot, MerchantWorkflow, RequestContext, audit, event, persistence};
use crate::domain::document::DocumentInput;
use crate::domain::effects::EventKind;
use crate::domain::merchant::{Maps, Merchant};
use crate::domain::rules;
use crate::domain::validation;
use crate::error::{MerchantError, Result};
use chrono::Utc;
use serde::Deserialize;

pub const ERR_RENAME_LIMIT: &str = "merchant name can only be changed once";

/// The editable profile as submitted by the merchant. Name, URL and email
/// are accepted but never applied; only registration and rename set them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MerchantProfile {
    #[serde(default)]
    pub merchant_name: String,
    #[serde(default)]
    pub merchant_url: String,
    #[serde(default)]
    pub merchant_email: String,
    #[serde(default)]
    pub phone_number: String,
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    /// `None` removes the stored location.
    #[serde(default)]
    pub maps: Option<Maps>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelfUpdate {
    pub merchant_id: String,
    pub profile: MerchantProfile,
    #[serde(default)]
    pub documents: Vec<DocumentInput>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Only the fields that are present are changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialSelfUpdate {
    pub merchant_id: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub maps: Option<Maps>,
    #[serde(default)]
    pub documents: Vec<DocumentInput>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rename {
    pub merchant_id: String,
    pub merchant_name: String,
}

impl MerchantWorkflow {
    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id))]
    pub async fn self_update(
        &self,
        ctx: &RequestContext,
        input: SelfUpdate,
    ) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.self_update_inner(ctx, input))
            .await
    }

    async fn self_update_inner(
        &self,
        ctx: &RequestContext,
        input: SelfUpdate,
    ) -> Result<MerchantSnapshot> {
        let profile = input.profile;
        validation::required("full name", &profile.full_name)?;
        let old = self.load_merchant(&input.merchant_id).await?;

        let mut merchant = old.clone();
        merchant.merchant_name = profile.merchant_name;
        merchant.merchant_url = profile.merchant_url;
        merchant.merchant_email = profile.merchant_email;
        merchant.phone_number = profile.phone_number;
        merchant.full_name = profile.full_name;
        merchant.description = profile.description;
        merchant.maps = profile.maps;
        merchant.preserve_immutable_fields(&old);

        self.write_profile("self_update", ctx, old, merchant, input.documents, input.expected_version)
            .await
    }

    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id))]
    pub async fn partial_self_update(
        &self,
        ctx: &RequestContext,
        input: PartialSelfUpdate,
    ) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.partial_self_update_inner(ctx, input))
            .await
    }

    async fn partial_self_update_inner(
        &self,
        ctx: &RequestContext,
        input: PartialSelfUpdate,
    ) -> Result<MerchantSnapshot> {
        if let Some(full_name) = &input.full_name {
            validation::required("full name", full_name)?;
        }
        let old = self.load_merchant(&input.merchant_id).await?;

        let mut merchant = old.clone();
        if let Some(phone_number) = input.phone_number {
            merchant.phone_number = phone_number;
        }
        if let Some(full_name) = input.full_name {
            merchant.full_name = full_name;
        }
        if let Some(description) = input.description {
            merchant.description = description;
        }
        if input.maps.is_some() {
            merchant.maps = input.maps;
        }

        self.write_profile(
            "partial_self_update",
            ctx,
            old,
            merchant,
            input.documents,
            input.expected_version,
        )
        .await
    }

    async fn write_profile(
        &self,
        operation: &'static str,
        ctx: &RequestContext,
        old: Merchant,
        mut merchant: Merchant,
        documents: Vec<DocumentInput>,
        expected_version: Option<u64>,
    ) -> Result<MerchantSnapshot> {
        let (status, is_active) = rules::update_status(old.status, None, old.is_active);
        merchant.status = status;
        merchant.is_active = is_active;
        merchant.touch(&ctx.actor, Utc::now());
        let expected = expected_version.unwrap_or(old.version);
        let maps_changed = merchant.maps != old.maps;
        let actor = &ctx.actor;

        self.execute(operation, |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(expected)).await?;
            if maps_changed {
                Self::save_maps(unit.as_ref(), &saved.id, saved.maps.as_ref()).await?;
            }
            let documents = self
                .save_documents(unit, &saved.id, actor, documents, false)
                .await?;
            let effects = vec![
                audit(&format!("merchant.{operation}"), &saved.id, Some(&old), Some(&saved), actor)?,
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

    /// One-shot rename. The budget is spent on the staged copy, so a rolled
    /// back rename leaves the stored counter untouched. The loaded version is
    /// pinned until commit, so two overlapping renames cannot both spend it.
    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id))]
    pub async fn rename(&self, ctx: &RequestContext, input: Rename) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.rename_inner(ctx, input))
            .await
    }

    async fn rename_inner(&self, ctx: &RequestContext, input: Rename) -> Result<MerchantSnapshot> {
        validation::required("merchant name", &input.merchant_name)?;
        validation::max_len("merchant name", &input.merchant_name, MAX_NAME_LEN)?;
        let old = self.load_merchant(&input.merchant_id).await?;
        if old.count_update_name_available <= 0 {
            return Err(MerchantError::validation(ERR_RENAME_LIMIT));
        }

        let mut merchant = old.clone();
        merchant.merchant_name = input.merchant_name.trim().to_string();
        merchant.count_update_name_available -= 1;
        merchant.touch(&ctx.actor, Utc::now());
        let actor = &ctx.actor;

        self.execute("rename", |unit| async move {
            unit.require_merchant_version(&old.id, old.version)
                .await
                .map_err(persistence("merchant"))?;
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(old.version)).await?;
            let effects = vec![
                audit("merchant.rename", &saved.id, Some(&old), Some(&saved), actor)?,
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
