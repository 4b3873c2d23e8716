//! Lifecycle events published by the coordinator

use feedhub_core::{DeliveryMode, SubscriptionKey};
use serde::Serialize;

use crate::binding::ConnectionToken;

/// Feed lifecycle notification, broadcast to any listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// First subscriber opened the feed at the exchange
    Bound {
        key: SubscriptionKey,
        mode: DeliveryMode,
        strategy_id: String,
        token: ConnectionToken,
    },
    /// Exchange refused to open the feed; nothing was registered
    BindFailed {
        key: SubscriptionKey,
        strategy_id: String,
        error: String,
    },
    /// Last subscriber left and the feed was closed
    Unbound {
        key: SubscriptionKey,
        token: ConnectionToken,
    },
    /// Closing the feed failed; it is kept for retry
    UnbindFailed {
        key: SubscriptionKey,
        token: ConnectionToken,
        attempts: u32,
        error: String,
    },
    /// A previously failed cleanup finally succeeded
    CleanupRecovered {
        key: SubscriptionKey,
        token: ConnectionToken,
        attempts: u32,
    },
    /// A strategy asked for an existing feed with another delivery mode
    ModeConflict {
        key: SubscriptionKey,
        strategy_id: String,
        existing: DeliveryMode,
        requested: DeliveryMode,
    },
}

impl CoordinatorEvent {
    pub fn key(&self) -> &SubscriptionKey {
        match self {
            Self::Bound { key, .. } => key,
            Self::BindFailed { key, .. } => key,
            Self::Unbound { key, .. } => key,
            Self::UnbindFailed { key, .. } => key,
            Self::CleanupRecovered { key, .. } => key,
            Self::ModeConflict { key, .. } => key,
        }
    }
}
