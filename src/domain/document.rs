use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document as submitted by a caller. `id` is carried over when the
/// caller edits a document it already owns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub id: Option<String>,
    pub document_type: String,
    pub document_value: String,
}

impl DocumentInput {
    pub fn new(document_type: impl Into<String>, document_value: impl Into<String>) -> Self {
        Self {
            id: None,
            document_type: document_type.into(),
            document_value: document_value.into(),
        }
    }
}

/// One uploaded compliance artifact (ID card, tax id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantDocument {
    pub id: String,
    pub merchant_id: String,
    pub document_type: String,
    /// Object-storage path of the uploaded file.
    pub document_value: String,
    /// Set on documents filed together with an upgrade request.
    pub is_pending_upgrade: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}
