//! Core types for the Feedhub subscription coordinator
//!
//! This crate defines the value types shared across the workspace:
//! channels, delivery modes, canonical parameters, subscription keys,
//! connection states and the stats payload.

pub mod channel;
pub mod error;
pub mod key;
pub mod params;
pub mod state;
pub mod stats;

pub use channel::{Channel, DeliveryMode};
pub use error::{FeedError, FeedResult};
pub use key::SubscriptionKey;
pub use params::ChannelParams;
pub use state::ConnectionState;
pub use stats::SubscriptionStats;
