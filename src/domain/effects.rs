//! Side-effect intents written to the outbox inside a transaction and
//! delivered after commit.

use super::merchant::{Actor, UpgradeStatus};
use crate::config::keys;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    MerchantActivated,
    UpgradeApproved,
    UpgradeRequested,
    UpgradeRejected,
    RegistrationRejected,
    EmployeeInvited,
}

impl EmailKind {
    /// Configuration key holding the template id for this email.
    pub fn template_key(&self) -> &'static str {
        match self {
            Self::MerchantActivated => keys::TEMPLATE_MERCHANT_ACTIVATED,
            Self::UpgradeApproved => keys::TEMPLATE_UPGRADE_APPROVED,
            Self::UpgradeRequested => keys::TEMPLATE_UPGRADE_REQUESTED,
            Self::UpgradeRejected => keys::TEMPLATE_UPGRADE_REJECTED,
            Self::RegistrationRejected => keys::TEMPLATE_REGISTRATION_REJECTED,
            Self::EmployeeInvited => keys::TEMPLATE_EMPLOYEE_INVITED,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::MerchantActivated => "Your merchant account is active",
            Self::UpgradeApproved => "Your merchant upgrade was approved",
            Self::UpgradeRequested => "We received your merchant upgrade request",
            Self::UpgradeRejected => "Your merchant upgrade request was rejected",
            Self::RegistrationRejected => "Your merchant registration was rejected",
            Self::EmployeeInvited => "You have been invited to join a merchant",
        }
    }

    /// Attachment configuration key, when this email carries one.
    pub fn attachment_key(&self) -> Option<&'static str> {
        match self {
            Self::MerchantActivated | Self::UpgradeApproved => Some(keys::ATTACHMENT_MERCHANT_GUIDE),
            _ => None,
        }
    }
}

/// Everything needed to render and send one templated email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailIntent {
    pub kind: EmailKind,
    pub to: String,
    pub merchant_name: String,
    pub full_name: String,
    pub upgrade_status: UpgradeStatus,
    pub reason: String,
    pub admin_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Created => "merchant.created",
            Self::Updated => "merchant.updated",
            Self::Deleted => "merchant.deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    Email(EmailIntent),
    Audit {
        action: String,
        target_id: String,
        before: Option<Value>,
        after: Option<Value>,
        actor: Actor,
    },
    Event {
        kind: EventKind,
        key: String,
        payload: Value,
    },
}

impl SideEffect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Audit { .. } => "audit",
            Self::Event { .. } => "event",
        }
    }
}

/// An undelivered (or delivered) side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: String,
    pub operation: String,
    pub effect: SideEffect,
    pub dispatched: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn new(operation: &str, effect: SideEffect, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            effect,
            dispatched: false,
            created_at: now,
        }
    }
}

/// A fully rendered email handed to the delivery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub action: String,
    pub target_id: String,
    pub actor_id: String,
    pub actor_name: String,
    pub ip: String,
}
