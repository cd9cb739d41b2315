//! Staff logins attached to a merchant.

use super::{MerchantWorkflow, RequestContext, audit, persistence};
use crate::domain::effects::{EmailIntent, EmailKind, SideEffect};
use crate::domain::employee::{EmployeeStatus, MerchantEmployee};
use crate::domain::merchant::{Actor, Merchant};
use crate::domain::rules;
use crate::domain::validation;
use crate::error::{MerchantError, Result};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEmployee {
    pub merchant_id: String,
    pub member_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeStatusChange {
    pub employee_id: String,
    pub status: EmployeeStatus,
}

fn invitation(merchant: &Merchant, employee: &MerchantEmployee, actor: &Actor) -> SideEffect {
    SideEffect::Email(EmailIntent {
        kind: EmailKind::EmployeeInvited,
        to: employee.email.clone(),
        merchant_name: merchant.merchant_name.clone(),
        full_name: merchant.full_name.clone(),
        upgrade_status: merchant.upgrade_status,
        reason: String::new(),
        admin_name: actor.name.clone(),
    })
}

impl MerchantWorkflow {
    async fn load_employee(&self, employee_id: &str) -> Result<MerchantEmployee> {
        self.stores
            .employees
            .find(employee_id)
            .await?
            .ok_or_else(|| MerchantError::not_found("employee", employee_id))
    }

    async fn save_employee(
        &self,
        operation: &'static str,
        actor: &Actor,
        before: Option<MerchantEmployee>,
        employee: MerchantEmployee,
        invite: Option<&Merchant>,
    ) -> Result<MerchantEmployee> {
        self.execute(operation, |unit| async move {
            let saved = unit
                .save_employee(&employee)
                .await
                .map_err(persistence("merchant employee"))?;
            let mut effects = vec![audit(
                &format!("employee.{operation}"),
                &saved.id,
                before.as_ref(),
                Some(&saved),
                actor,
            )?];
            if let Some(merchant) = invite {
                effects.push(invitation(merchant, &saved, actor));
            }
            Ok::<_, MerchantError>((saved, effects))
        })
        .await
    }

    /// Invites a member to work for the merchant.
    #[tracing::instrument(skip_all, fields(merchant_id = %input.merchant_id, member_id = %input.member_id))]
    pub async fn add_employee(
        &self,
        ctx: &RequestContext,
        input: NewEmployee,
    ) -> Result<MerchantEmployee> {
        self.within_deadline(ctx, self.add_employee_inner(ctx, input))
            .await
    }

    async fn add_employee_inner(
        &self,
        ctx: &RequestContext,
        input: NewEmployee,
    ) -> Result<MerchantEmployee> {
        validation::required("member id", &input.member_id)?;
        validation::email("employee email", &input.email)?;
        let merchant = self.load_merchant(&input.merchant_id).await?;
        if merchant.member_id == input.member_id {
            return Err(MerchantError::validation(
                "the merchant owner cannot be added as an employee",
            ));
        }
        if self
            .stores
            .employees
            .find_by_member(&merchant.id, &input.member_id)
            .await?
            .is_some()
        {
            return Err(MerchantError::AlreadyExists(format!(
                "employee {} of merchant {}",
                input.member_id, merchant.id
            )));
        }

        let now = Utc::now();
        let employee = MerchantEmployee {
            id: Uuid::new_v4().to_string(),
            merchant_id: merchant.id.clone(),
            member_id: input.member_id,
            email: input.email,
            status: EmployeeStatus::Invited,
            reinvited: false,
            created_at: now,
            created_by: ctx.actor.user_id.clone(),
            updated_at: now,
            updated_by: ctx.actor.user_id.clone(),
        };
        self.save_employee("add", &ctx.actor, None, employee, Some(&merchant))
            .await
    }

    #[tracing::instrument(skip_all, fields(employee_id = %input.employee_id, status = %input.status))]
    pub async fn change_employee_status(
        &self,
        ctx: &RequestContext,
        input: EmployeeStatusChange,
    ) -> Result<MerchantEmployee> {
        self.within_deadline(ctx, self.change_employee_status_inner(ctx, input))
            .await
    }

    async fn change_employee_status_inner(
        &self,
        ctx: &RequestContext,
        input: EmployeeStatusChange,
    ) -> Result<MerchantEmployee> {
        let old = self.load_employee(&input.employee_id).await?;
        self.load_merchant(&old.merchant_id).await?;
        let status = rules::employee_status_change(old.status, input.status)?;

        let mut employee = old.clone();
        employee.status = status;
        employee.updated_at = Utc::now();
        employee.updated_by.clone_from(&ctx.actor.user_id);
        self.save_employee("change_status", &ctx.actor, Some(old), employee, None)
            .await
    }

    /// Sends a revoked employee a fresh invitation. Allowed once.
    #[tracing::instrument(skip_all, fields(employee_id = %employee_id))]
    pub async fn reinvite_employee(
        &self,
        ctx: &RequestContext,
        employee_id: &str,
    ) -> Result<MerchantEmployee> {
        self.within_deadline(ctx, self.reinvite_employee_inner(ctx, employee_id))
            .await
    }

    async fn reinvite_employee_inner(
        &self,
        ctx: &RequestContext,
        employee_id: &str,
    ) -> Result<MerchantEmployee> {
        let old = self.load_employee(employee_id).await?;
        let merchant = self.load_merchant(&old.merchant_id).await?;
        let status = rules::reinvite(old.status, old.reinvited)?;

        let mut employee = old.clone();
        employee.status = status;
        employee.reinvited = true;
        employee.updated_at = Utc::now();
        employee.updated_by.clone_from(&ctx.actor.user_id);
        self.save_employee("reinvite", &ctx.actor, Some(old), employee, Some(&merchant))
            .await
    }
}
