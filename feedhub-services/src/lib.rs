//! Subscription coordination services for Feedhub
//!
//! Strategies subscribe to exchange feeds through the
//! [`SubscriptionCoordinator`], which opens each distinct feed once and
//! shares it between every strategy asking for it.

pub mod binding;
pub mod config;
pub mod coordinator;
pub mod error;
mod registry;
pub mod retry;
mod strategy_index;

pub use binding::{ConnectionToken, ExchangeBinding, SharedBinding, SimulatedBinding};
pub use config::{ConfigError, CoordinatorConfig, ModeConflictPolicy};
pub use coordinator::{CoordinatorEvent, SubscriptionCoordinator, SubscriptionHandle};
pub use error::{BindingError, ClearFailure, CoordinatorError, CoordinatorResult};
pub use registry::{CleanupSnapshot, RecordSnapshot};
pub use retry::RetryConfig;
