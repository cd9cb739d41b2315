use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeStatus {
    Invited,
    Active,
    Inactive,
    Revoked,
}

impl EmployeeStatus {
    pub const ALL: [Self; 4] = [Self::Invited, Self::Active, Self::Inactive, Self::Revoked];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invited => "INVITED",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for EmployeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staff login attached to a merchant; unique per (merchant, member).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantEmployee {
    pub id: String,
    pub merchant_id: String,
    pub member_id: String,
    pub email: String,
    pub status: EmployeeStatus,
    /// A revoked employee may be invited again exactly once.
    pub reinvited: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}
