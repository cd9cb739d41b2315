use thiserror::Error;

#[derive(Error, Debug)]
pub enum MerchantError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("Version conflict on merchant {id}: expected version {expected}, found {found}")]
    Conflict {
        id: String,
        expected: u64,
        found: u64,
    },
    #[error("Concurrent update to {entity} {id}")]
    Contention { entity: &'static str, id: String },
    #[error("{0}")]
    PersistenceError(String),
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

pub type Result<T> = std::result::Result<T, MerchantError>;

impl MerchantError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// HTTP-style status code reported to the caller of a workflow operation.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError(_) => 400,
            Self::NotFound { .. } => 404,
            Self::AlreadyExists(_) | Self::Conflict { .. } | Self::Contention { .. } => 409,
            Self::Cancelled(_) => 408,
            _ => 500,
        }
    }

    /// Only lost races against another writer are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Contention { .. })
    }
}
