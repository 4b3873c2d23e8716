//! Error types for the feed core

use thiserror::Error;

/// Errors raised while validating or canonicalizing a feed request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParams { name: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl FeedError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        FeedError::InvalidRequest(msg.into())
    }

    pub fn invalid_params(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FeedError::InvalidParams {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        FeedError::Parse(msg.into())
    }
}

/// Result type alias for feed core operations
pub type FeedResult<T> = Result<T, FeedError>;
