use super::merchant::Maps;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A merchant or warehouse address. Each owner has at most one primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub owner_id: String,
    pub label: String,
    pub address: String,
    pub is_primary: bool,
    pub maps: Option<Maps>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}
