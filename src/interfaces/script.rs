//! Executes scripted commands against a [`MerchantWorkflow`].

use super::jsonl::command_reader::Command;
use crate::application::workflow::{
    AdminUpdate, EmployeeStatusChange, MerchantWorkflow, NewAddress, NewEmployee,
    PartialSelfUpdate, Rejection, Rename, RequestContext, SelfUpdate, SetPrimaryAddress,
    UpgradeRequest,
};
use crate::error::{MerchantError, Result};

pub struct ScriptRunner<'a> {
    workflow: &'a MerchantWorkflow,
    ctx: RequestContext,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(workflow: &'a MerchantWorkflow, ctx: RequestContext) -> Self {
        Self { workflow, ctx }
    }

    async fn merchant_id(&self, merchant_url: &str) -> Result<String> {
        Ok(self.workflow.merchant_by_url(merchant_url).await?.id)
    }

    async fn employee_id(&self, merchant_url: &str, member_id: &str) -> Result<String> {
        let merchant_id = self.merchant_id(merchant_url).await?;
        Ok(self.workflow.employee_of(&merchant_id, member_id).await?.id)
    }

    #[tracing::instrument(skip_all, fields(op = command.name()))]
    pub async fn run(&self, command: Command) -> Result<()> {
        let workflow = self.workflow;
        let ctx = &self.ctx;
        match command {
            Command::Register(input) => {
                let created = workflow.register(ctx, input).await?;
                tracing::info!(merchant_id = %created.merchant.id, status = %created.merchant.status, "registered");
            }
            Command::RequestUpgrade {
                merchant_url,
                merchant_type,
                documents,
            } => {
                let input = UpgradeRequest {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    merchant_type,
                    documents,
                };
                workflow.request_upgrade(ctx, input).await?;
            }
            Command::Approve {
                merchant_url,
                status,
                is_active,
                approve_upgrade,
            } => {
                let input = AdminUpdate {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    status,
                    is_active,
                    approve_upgrade,
                    expected_version: None,
                };
                workflow.approve(ctx, input).await?;
            }
            Command::RejectRegistration {
                merchant_url,
                reason,
            } => {
                let input = Rejection {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    reason,
                };
                workflow.reject_registration(ctx, input).await?;
            }
            Command::RejectUpgrade {
                merchant_url,
                reason,
            } => {
                let input = Rejection {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    reason,
                };
                workflow.reject_upgrade(ctx, input).await?;
            }
            Command::SelfUpdate {
                merchant_url,
                profile,
                documents,
            } => {
                let input = SelfUpdate {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    profile,
                    documents,
                    expected_version: None,
                };
                workflow.self_update(ctx, input).await?;
            }
            Command::PartialSelfUpdate {
                merchant_url,
                phone_number,
                full_name,
                description,
                maps,
                documents,
            } => {
                let input = PartialSelfUpdate {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    phone_number,
                    full_name,
                    description,
                    maps,
                    documents,
                    expected_version: None,
                };
                workflow.partial_self_update(ctx, input).await?;
            }
            Command::Rename {
                merchant_url,
                merchant_name,
            } => {
                let input = Rename {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    merchant_name,
                };
                workflow.rename(ctx, input).await?;
            }
            Command::Delete { merchant_url } => {
                let merchant_id = self.merchant_id(&merchant_url).await?;
                workflow.delete(ctx, &merchant_id).await?;
            }
            Command::ClearRejectedUpgrade { merchant_url } => {
                let merchant_id = self.merchant_id(&merchant_url).await?;
                workflow.clear_rejected_upgrade(ctx, &merchant_id).await?;
            }
            Command::AddEmployee {
                merchant_url,
                member_id,
                email,
            } => {
                let input = NewEmployee {
                    merchant_id: self.merchant_id(&merchant_url).await?,
                    member_id,
                    email,
                };
                workflow.add_employee(ctx, input).await?;
            }
            Command::ChangeEmployeeStatus {
                merchant_url,
                member_id,
                status,
            } => {
                let input = EmployeeStatusChange {
                    employee_id: self.employee_id(&merchant_url, &member_id).await?,
                    status,
                };
                workflow.change_employee_status(ctx, input).await?;
            }
            Command::ReinviteEmployee {
                merchant_url,
                member_id,
            } => {
                let employee_id = self.employee_id(&merchant_url, &member_id).await?;
                workflow.reinvite_employee(ctx, &employee_id).await?;
            }
            Command::AddAddress {
                merchant_url,
                label,
                address,
                maps,
                primary,
            } => {
                let input = NewAddress {
                    owner_id: self.merchant_id(&merchant_url).await?,
                    label,
                    address,
                    maps,
                    primary,
                };
                workflow.add_address(ctx, input).await?;
            }
            Command::SetPrimaryAddress {
                merchant_url,
                label,
            } => {
                let owner_id = self.merchant_id(&merchant_url).await?;
                let address = workflow
                    .addresses_of(&owner_id)
                    .await?
                    .into_iter()
                    .find(|a| a.label == label)
                    .ok_or_else(|| MerchantError::not_found("address", label.as_str()))?;
                workflow
                    .set_primary_address(
                        ctx,
                        SetPrimaryAddress {
                            address_id: address.id,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
