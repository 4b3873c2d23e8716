//! Connection state of an exchange-side feed

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the exchange binding behind a subscription
///
/// `Pending` → `Active` → `Closing` → `Closed`, or `Closing` → `Error` when
/// the unbind call fails and the cleanup has to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Bind call in flight
    Pending,
    /// Bound and delivering data
    Active,
    /// Unbind call in flight
    Closing,
    /// Unbind failed, cleanup waiting for retry
    Error,
    /// Unbound and removed
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Pending => "pending",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Error => "error",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
