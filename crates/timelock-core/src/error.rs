use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ItemId, ItemStatus};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Key storage failed for item {item}: {reason}")]
    KeyStorageFailed { item: ItemId, reason: String },

    #[error("Key retrieval failed for item {item}: {reason}")]
    KeyRetrievalFailed { item: ItemId, reason: String },

    #[error("No key stored for item {0}")]
    KeyNotFound(ItemId),

    #[error("Key deletion failed for item {item}: {reason}")]
    KeyDeleteFailed { item: ItemId, reason: String },

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed (blob malformed or authentication tag mismatch)")]
    DecryptionFailed,

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Blob write failed: {0}")]
    BlobWriteFailed(String),

    #[error("Item not found: {0}")]
    RepositoryNotFound(ItemId),

    #[error("Repository write failed: {0}")]
    RepositoryWriteFailed(String),

    #[error("Unlock date {unlock_at} is earlier than creation date {created_at}")]
    InvalidUnlockDate {
        unlock_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    },

    #[error("Item {item} cannot move from {from} to {to}")]
    InvalidTransition {
        item: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Item {item} is still locked until {unlock_at}")]
    StillLocked {
        item: ItemId,
        unlock_at: DateTime<Utc>,
    },

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Notification gateway error: {0}")]
    NotificationFailed(String),

    #[error("Unlock run cancelled before commit")]
    Cancelled,

    #[error("Deletion of item {item} incomplete: {}", failures.join("; "))]
    DeletionIncomplete { item: ItemId, failures: Vec<String> },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// True for the failures a caller should present as "content unavailable".
    pub fn is_content_unavailable(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed
                | VaultError::KeyNotFound(_)
                | VaultError::KeyRetrievalFailed { .. }
                | VaultError::BlobNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
