//! Error types for the coordinator services

use feedhub_core::{DeliveryMode, FeedError, SubscriptionKey};
use thiserror::Error;

/// Failure reported by an exchange connector on bind or unbind
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Binding error ({exchange}): {message}")]
pub struct BindingError {
    pub exchange: String,
    pub message: String,
}

impl BindingError {
    pub fn new(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            message: message.into(),
        }
    }
}

/// One feed whose teardown failed during [`clear`](crate::SubscriptionCoordinator::clear)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearFailure {
    pub key: SubscriptionKey,
    pub error: BindingError,
}

/// Errors returned by the subscription coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Malformed request, rejected before any state was touched
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The exchange refused to open the feed
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// The feed exists with another delivery mode and the policy is `reject`
    #[error("Mode conflict on {key}: feed uses {existing}, requested {requested}")]
    ModeConflict {
        key: SubscriptionKey,
        existing: DeliveryMode,
        requested: DeliveryMode,
    },

    /// Teardown completed but some unbind calls failed
    #[error("Clear finished with {} failed cleanup(s)", .failures.len())]
    Clear { failures: Vec<ClearFailure> },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        CoordinatorError::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoordinatorError::Internal(msg.into())
    }
}

impl From<FeedError> for CoordinatorError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::InvalidRequest(msg) => CoordinatorError::InvalidRequest(msg),
            other => CoordinatorError::InvalidRequest(other.to_string()),
        }
    }
}

/// Result type alias for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
