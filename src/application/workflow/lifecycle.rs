//! Registration, admin review and deletion.

use super::{MerchantSnapshot, MerchantWorkflow, RequestContext, audit, email, event, persistence};
use crate::domain::document::DocumentInput;
use crate::domain::effects::{EmailKind, EventKind};
use crate::domain::merchant::{
    Maps, Merchant, MerchantStatus, MerchantType, UpgradeStatus, optional_status,
};
use crate::domain::rules;
use crate::domain::validation;
use crate::error::{MerchantError, Result};
use chrono::Utc;
use serde::Deserialize;

pub const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    pub member_id: String,
    pub merchant_name: String,
    pub merchant_url: String,
    pub merchant_email: String,
    #[serde(default)]
    pub phone_number: String,
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    /// Explicit starting status; absent means derive from `is_active`.
    #[serde(default, deserialize_with = "optional_status")]
    pub status: Option<MerchantStatus>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub maps: Option<Maps>,
    #[serde(default)]
    pub documents: Vec<DocumentInput>,
}

/// Admin review of a merchant: status, activation and upgrade approval.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminUpdate {
    pub merchant_id: String,
    #[serde(default, deserialize_with = "optional_status")]
    pub status: Option<MerchantStatus>,
    #[serde(default)]
    pub is_active: bool,
    /// Grants the pending upgrade. Ignored when the upgrade is already active.
    #[serde(default)]
    pub approve_upgrade: bool,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rejection {
    pub merchant_id: String,
    pub reason: String,
}

impl MerchantWorkflow {
    #[tracing::instrument(skip_all, fields(member_id = %input.member_id, url = %input.merchant_url))]
    pub async fn register(
        &self,
        ctx: &RequestContext,
        input: Registration,
    ) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.register_inner(ctx, input)).await
    }

    async fn register_inner(
        &self,
        ctx: &RequestContext,
        input: Registration,
    ) -> Result<MerchantSnapshot> {
        validation::required("member id", &input.member_id)?;
        validation::required("merchant name", &input.merchant_name)?;
        validation::max_len("merchant name", &input.merchant_name, MAX_NAME_LEN)?;
        validation::slug("merchant url", &input.merchant_url)?;
        validation::email("merchant email", &input.merchant_email)?;
        validation::required("full name", &input.full_name)?;

        if self.stores.merchants.find_by_member(&input.member_id).await?.is_some() {
            return Err(MerchantError::AlreadyExists(format!(
                "merchant for member {}",
                input.member_id
            )));
        }
        if self.stores.merchants.find_by_url(&input.merchant_url).await?.is_some() {
            return Err(MerchantError::AlreadyExists(format!(
                "merchant url {}",
                input.merchant_url
            )));
        }
        if self.stores.merchants.find_by_email(&input.merchant_email).await?.is_some() {
            return Err(MerchantError::AlreadyExists(format!(
                "merchant email {}",
                input.merchant_email
            )));
        }

        let (status, is_active) = rules::creation_status(input.status, input.is_active);
        let now = Utc::now();
        let actor = &ctx.actor;
        let merchant = Merchant {
            id: Merchant::generate_id(now),
            member_id: input.member_id,
            merchant_name: input.merchant_name.trim().to_string(),
            merchant_url: input.merchant_url,
            merchant_email: input.merchant_email,
            phone_number: input.phone_number,
            full_name: input.full_name,
            description: input.description,
            status,
            is_active,
            upgrade_status: UpgradeStatus::None,
            merchant_type: MerchantType::Regular,
            reason: String::new(),
            count_update_name_available: 1,
            version: 1,
            maps: input.maps,
            created_at: now,
            created_by: actor.user_id.clone(),
            created_ip: actor.ip.clone(),
            updated_at: now,
            updated_by: actor.user_id.clone(),
            updated_ip: actor.ip.clone(),
        };
        let documents = input.documents;

        self.execute("register", |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, None).await?;
            if let Some(maps) = &merchant.maps {
                Self::save_maps(unit.as_ref(), &merchant.id, Some(maps)).await?;
            }
            let documents = self
                .save_documents(unit, &merchant.id, actor, documents, false)
                .await?;

            let mut effects = vec![
                audit("merchant.register", &saved.id, None, Some(&saved), actor)?,
                event(EventKind::Created, &saved)?,
            ];
            if saved.is_active {
                effects.push(email(EmailKind::MerchantActivated, &saved, actor));
            }
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

    /// Admin update. Activation and upgrade approval notifications go out
    /// only on the transition into the active state.
    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id))]
    pub async fn approve(&self, ctx: &RequestContext, input: AdminUpdate) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.approve_inner(ctx, input)).await
    }

    async fn approve_inner(&self, ctx: &RequestContext, input: AdminUpdate) -> Result<MerchantSnapshot> {
        if input.status == Some(MerchantStatus::Deleted) {
            return Err(MerchantError::validation(
                "merchants are removed through delete, not a status change",
            ));
        }
        let old = self.load_merchant(&input.merchant_id).await?;
        let (status, is_active) = rules::update_status(old.status, input.status, input.is_active);

        let mut merchant = old.clone();
        merchant.status = status;
        merchant.is_active = is_active;
        let approving = input.approve_upgrade && old.upgrade_status != UpgradeStatus::Active;
        if approving {
            merchant.merchant_type = rules::approve_upgrade(old.upgrade_status)?;
            merchant.upgrade_status = UpgradeStatus::Active;
            merchant.reason.clear();
        }
        merchant.preserve_immutable_fields(&old);
        merchant.touch(&ctx.actor, Utc::now());

        let transition = rules::transition_effects(
            old.is_active,
            old.upgrade_status,
            merchant.is_active,
            merchant.upgrade_status,
        );
        let expected = input.expected_version.unwrap_or(old.version);
        let actor = &ctx.actor;

        self.execute("approve", |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(expected)).await?;
            if approving {
                unit.reset_pending_documents(&saved.id)
                    .await
                    .map_err(persistence("merchant documents"))?;
            }

            let mut effects = vec![
                audit("merchant.approve", &saved.id, Some(&old), Some(&saved), actor)?,
                event(EventKind::Updated, &saved)?,
            ];
            if transition.activated {
                effects.push(email(EmailKind::MerchantActivated, &saved, actor));
            }
            if transition.approved {
                effects.push(email(EmailKind::UpgradeApproved, &saved, actor));
            }
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

    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id))]
    pub async fn reject_registration(
        &self,
        ctx: &RequestContext,
        input: Rejection,
    ) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.reject_registration_inner(ctx, input))
            .await
    }

    async fn reject_registration_inner(
        &self,
        ctx: &RequestContext,
        input: Rejection,
    ) -> Result<MerchantSnapshot> {
        validation::required("reason", &input.reason)?;
        let old = self.load_merchant(&input.merchant_id).await?;
        rules::ensure_rejectable_registration(old.status, old.is_active)?;

        let (status, is_active) =
            rules::update_status(old.status, Some(MerchantStatus::Inactive), false);
        let mut merchant = old.clone();
        merchant.status = status;
        merchant.is_active = is_active;
        merchant.reason = input.reason;
        merchant.touch(&ctx.actor, Utc::now());
        let actor = &ctx.actor;

        self.execute("reject_registration", |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(old.version)).await?;
            let effects = vec![
                email(EmailKind::RegistrationRejected, &saved, actor),
                audit("merchant.reject_registration", &saved.id, Some(&old), Some(&saved), actor)?,
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

    /// Soft delete: the row stays with status `DELETED`; the maps row goes.
    #[tracing::instrument(skip_all, fields(merchant_id = %merchant_id))]
    pub async fn delete(&self, ctx: &RequestContext, merchant_id: &str) -> Result<MerchantSnapshot> {
        self.within_deadline(ctx, self.delete_inner(ctx, merchant_id))
            .await
    }

    async fn delete_inner(&self, ctx: &RequestContext, merchant_id: &str) -> Result<MerchantSnapshot> {
        let old = self.load_merchant(merchant_id).await?;
        let mut merchant = old.clone();
        merchant.status = MerchantStatus::Deleted;
        merchant.is_active = false;
        merchant.maps = None;
        merchant.touch(&ctx.actor, Utc::now());
        let actor = &ctx.actor;

        self.execute("delete", |unit| async move {
            let saved = Self::save_merchant(unit.as_ref(), &merchant, Some(old.version)).await?;
            Self::save_maps(unit.as_ref(), &saved.id, None).await?;
            let effects = vec![
                audit("merchant.delete", &saved.id, Some(&old), Some(&saved), actor)?,
                event(EventKind::Deleted, &saved)?,
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
