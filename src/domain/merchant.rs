use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use crate::error::MerchantError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Who performs an operation, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub name: String,
    pub ip: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            ip: ip.into(),
        }
    }

    pub fn system() -> Self {
        Self::new("system", "System", "127.0.0.1")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantStatus {
    #[default]
    New,
    Active,
    Inactive,
    Deleted,
}

impl MerchantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for MerchantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MerchantStatus {
    type Err = MerchantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "DELETED" => Ok(Self::Deleted),
            other => Err(MerchantError::validation(format!(
                "unknown merchant status {other:?}"
            ))),
        }
    }
}

/// Reads an optional status where an empty string means "not given".
pub fn optional_status<'de, D>(deserializer: D) -> Result<Option<MerchantStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(status) => status.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Progress of a tier upgrade request. `None` serializes as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpgradeStatus {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "PENDING_MANAGE")]
    PendingManage,
    #[serde(rename = "PENDING_ASSOCIATE")]
    PendingAssociate,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "REJECT_MANAGE")]
    RejectManage,
    #[serde(rename = "REJECT_ASSOCIATE")]
    RejectAssociate,
}

impl UpgradeStatus {
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::PendingManage,
        Self::PendingAssociate,
        Self::Active,
        Self::RejectManage,
        Self::RejectAssociate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::PendingManage => "PENDING_MANAGE",
            Self::PendingAssociate => "PENDING_ASSOCIATE",
            Self::Active => "ACTIVE",
            Self::RejectManage => "REJECT_MANAGE",
            Self::RejectAssociate => "REJECT_ASSOCIATE",
        }
    }

    /// Human readable label used in email templates.
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "-",
            Self::PendingManage => "Pending Manage",
            Self::PendingAssociate => "Pending Associate",
            Self::Active => "Active",
            Self::RejectManage => "Rejected Manage",
            Self::RejectAssociate => "Rejected Associate",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingManage | Self::PendingAssociate)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::RejectManage | Self::RejectAssociate)
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service tier. `Regular` is the base tier every merchant starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantType {
    #[default]
    Regular,
    Manage,
    Associate,
}

impl MerchantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::Manage => "MANAGE",
            Self::Associate => "ASSOCIATE",
        }
    }
}

impl fmt::Display for MerchantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geo point attached one-to-one to a merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maps {
    pub latitude: Decimal,
    pub longitude: Decimal,
    #[serde(default)]
    pub label: String,
}

/// The merchant aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub member_id: String,
    pub merchant_name: String,
    /// Vanity URL, set once at registration.
    pub merchant_url: String,
    pub merchant_email: String,
    pub phone_number: String,
    pub full_name: String,
    pub description: String,
    pub status: MerchantStatus,
    pub is_active: bool,
    pub upgrade_status: UpgradeStatus,
    pub merchant_type: MerchantType,
    /// Last rejection reason, registration or upgrade.
    pub reason: String,
    pub count_update_name_available: i32,
    pub version: u64,
    /// Stored in its own table; joined back on load.
    #[serde(default)]
    pub maps: Option<Maps>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub created_ip: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_ip: String,
}

impl Merchant {
    /// Builds an ID of the form `M<yyyyMMddHHmmss><6 hex chars>`.
    pub fn generate_id(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("M{}{}", now.format("%Y%m%d%H%M%S"), &suffix[..6])
    }

    /// Re-applies the fields that only registration (or rename) may set.
    pub fn preserve_immutable_fields(&mut self, before: &Merchant) {
        self.id.clone_from(&before.id);
        self.member_id.clone_from(&before.member_id);
        self.merchant_url.clone_from(&before.merchant_url);
        self.merchant_name.clone_from(&before.merchant_name);
        self.merchant_email.clone_from(&before.merchant_email);
        self.created_at = before.created_at;
        self.created_by.clone_from(&before.created_by);
        self.created_ip.clone_from(&before.created_ip);
    }

    /// Stamps the update and bumps the version.
    pub fn touch(&mut self, actor: &Actor, now: DateTime<Utc>) {
        self.updated_at = now;
        self.updated_by.clone_from(&actor.user_id);
        self.updated_ip.clone_from(&actor.ip);
        self.version += 1;
    }

    pub fn is_deleted(&self) -> bool {
        self.status == MerchantStatus::Deleted
    }
}
