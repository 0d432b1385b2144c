//! Error types for the conversation gateway.

use thiserror::Error;

use crate::storage::{ObjectStoreError, StoreError};

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The addressed conversation or file does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// A required input is missing or unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Key-value store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Object store failure.
    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
}

impl GatewayError {
    /// Shorthand for [`GatewayError::InvalidInput`].
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Convenience result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
