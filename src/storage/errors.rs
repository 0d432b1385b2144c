//! Error types for the storage layer.

use thiserror::Error;

/// Key-value store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write condition (`attribute_exists` / `attribute_not_exists`) did not hold.
    #[error("conditional check failed for {pk}/{sk}")]
    ConditionFailed {
        /// Partition key of the rejected item.
        pk: String,
        /// Sort key of the rejected item.
        sk: String,
    },
    /// The item or request is structurally invalid.
    #[error("invalid item: {0}")]
    InvalidItem(String),
    /// An update action targeted an attribute holding an incompatible value.
    #[error("attribute {attribute} is not a {expected}")]
    TypeMismatch {
        /// Attribute name.
        attribute: String,
        /// Expected value kind.
        expected: &'static str,
    },
    /// Counter arithmetic overflowed.
    #[error("counter overflow on attribute {0}")]
    Overflow(String),
    /// Item body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Backend (`SQLite`) failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error comes from a failed write condition.
    #[must_use]
    pub const fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            // Store errors raised inside a connection closure travel boxed.
            tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Self>() {
                Ok(store_err) => *store_err,
                Err(other) => Self::Backend(other.to_string()),
            },
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Convenience result alias for key-value operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Object store error type.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// Invalid backend configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Bucket name or object key rejected before reaching the backend.
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    /// No object stored at the key.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Backend operation failed.
    #[error("storage operation failed: {0}")]
    OpenDal(#[from] opendal::Error),
}

impl ObjectStoreError {
    /// Whether the object was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the bucket or key was rejected before reaching the backend.
    #[must_use]
    pub const fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey(_))
    }
}

/// Convenience result alias for object store operations.
pub type ObjectResult<T> = Result<T, ObjectStoreError>;
