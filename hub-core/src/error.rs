//! Error types for hub operations

use crate::EntityType;
use thiserror::Error;

/// Durable store errors.
///
/// Conditional-check violations map to `NotFound` / `AlreadyExists`; every
/// other backend fault is reported as `Backend` and is safe to retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Item not found: pk={pk} sk={sk}")]
    NotFound { pk: String, sk: String },

    #[error("Item already exists: pk={pk} sk={sk}")]
    AlreadyExists { pk: String, sk: String },

    #[error("Backend error: {reason}")]
    Backend { reason: String },

    #[error("Transaction canceled: {reason}")]
    TransactionCanceled { reason: String },

    #[error("Transaction with {items} items exceeds the limit of {limit}")]
    TransactionTooLarge { items: usize, limit: usize },

    #[error("Batch partially applied ({completed_chunks}/{total_chunks} chunks committed): {reason}")]
    PartialBatch {
        completed_chunks: usize,
        total_chunks: usize,
        reason: String,
    },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache errors. The coordinator logs these and treats them as a miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization error for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Cache is closed")]
    Closed,
}

/// Validation errors, raised before any I/O happens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Attribute {field} cannot be changed after creation")]
    ImmutableAttribute { field: String },

    #[error("Unknown attribute {field} for {entity_type}")]
    UnknownAttribute {
        entity_type: EntityType,
        field: String,
    },

    #[error("Partition {pk} still holds {children} child items")]
    HasChildren { pk: String, children: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all hub errors.
#[derive(Debug, Clone, Error)]
pub enum HubError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,
}

impl HubError {
    /// True when a point operation addressed an absent row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::Storage(StorageError::NotFound { .. }))
    }

    /// True when a conditional create collided with an existing row.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, HubError::Storage(StorageError::AlreadyExists { .. }))
    }

    /// True for faults a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HubError::Storage(StorageError::Backend { .. }) | HubError::DeadlineExceeded
        )
    }
}

/// Result type alias for hub operations.
pub type HubResult<T> = Result<T, HubError>;

// =============================================================================
// TESTS
// =============================================================================
