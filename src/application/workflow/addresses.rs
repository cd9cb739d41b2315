//! Merchant and warehouse addresses. Each owner has at most one primary.

use super::{MerchantWorkflow, RequestContext, audit, persistence};
use crate::domain::address::Address;
use crate::domain::merchant::Maps;
use crate::domain::validation;
use crate::error::{MerchantError, Result};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAddress {
    pub owner_id: String,
    #[serde(default)]
    pub label: String,
    pub address: String,
    #[serde(default)]
    pub maps: Option<Maps>,
    /// The owner's first address becomes primary regardless.
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetPrimaryAddress {
    pub address_id: String,
}

impl MerchantWorkflow {
    #[tracing::instrument(skip_all, fields(owner_id = %input.owner_id))]
    pub async fn add_address(&self, ctx: &RequestContext, input: NewAddress) -> Result<Address> {
        self.within_deadline(ctx, self.add_address_inner(ctx, input))
            .await
    }

    async fn add_address_inner(&self, ctx: &RequestContext, input: NewAddress) -> Result<Address> {
        validation::required("owner id", &input.owner_id)?;
        validation::required("address", &input.address)?;
        let siblings = self.stores.addresses.find_by_owner(&input.owner_id).await?;
        let address = Address {
            id: Uuid::new_v4().to_string(),
            owner_id: input.owner_id,
            label: input.label,
            address: input.address,
            is_primary: input.primary || siblings.is_empty(),
            maps: input.maps,
            updated_at: Utc::now(),
            updated_by: ctx.actor.user_id.clone(),
        };
        let actor = &ctx.actor;

        self.execute("add_address", |unit| async move {
            if address.is_primary {
                unit.unset_primary_addresses(&address.owner_id)
                    .await
                    .map_err(persistence("address"))?;
            }
            let saved = unit
                .save_address(&address)
                .await
                .map_err(persistence("address"))?;
            let effects = vec![audit("address.add", &saved.id, None, Some(&saved), actor)?];
            Ok::<_, MerchantError>((saved, effects))
        })
        .await
    }

    /// Makes one address the owner's primary. Siblings are unset first, in
    /// the same transaction.
    #[tracing::instrument(skip_all, fields(address_id = %input.address_id))]
    pub async fn set_primary_address(
        &self,
        ctx: &RequestContext,
        input: SetPrimaryAddress,
    ) -> Result<Address> {
        self.within_deadline(ctx, self.set_primary_address_inner(ctx, input))
            .await
    }

    async fn set_primary_address_inner(
        &self,
        ctx: &RequestContext,
        input: SetPrimaryAddress,
    ) -> Result<Address> {
        let old = self
            .stores
            .addresses
            .find(&input.address_id)
            .await?
            .ok_or_else(|| MerchantError::not_found("address", input.address_id.as_str()))?;

        let mut address = old.clone();
        address.is_primary = true;
        address.updated_at = Utc::now();
        address.updated_by.clone_from(&ctx.actor.user_id);
        let actor = &ctx.actor;

        self.execute("set_primary_address", |unit| async move {
            let unset = unit
                .unset_primary_addresses(&address.owner_id)
                .await
                .map_err(persistence("address"))?;
            tracing::debug!(unset, "previous primary addresses cleared");
            let saved = unit
                .save_address(&address)
                .await
                .map_err(persistence("address"))?;
            let effects = vec![audit(
                "address.set_primary",
                &saved.id,
                Some(&old),
                Some(&saved),
                actor,
            )?];
            Ok::<_, MerchantError>((saved, effects))
        })
        .await
    }
}
