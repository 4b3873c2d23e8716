//! Exchange binding adapter
//!
//! The coordinator never talks to an exchange directly. It asks an
//! [`ExchangeBinding`] to open a feed (`bind`) and later to close it
//! (`unbind`) with the token returned on bind. Connectors live outside this
//! crate; [`SimulatedBinding`] is an in-memory stand-in for demos and tests.

use async_trait::async_trait;
use feedhub_core::{Channel, ChannelParams, DeliveryMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::BindingError;

/// Opaque handle for an open exchange feed, returned by `bind`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionToken(String);

impl ConnectionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Narrow interface to an exchange connector
///
/// Implementations are not assumed to be idempotent. The coordinator calls
/// `bind` at most once per first-reference transition of a key and `unbind`
/// once per last-reference transition (plus retries after a failed unbind).
#[async_trait]
pub trait ExchangeBinding: Send + Sync {
    /// Exchange identity used as the first component of subscription keys
    fn exchange_id(&self) -> &str;

    /// Open a feed at the exchange
    async fn bind(
        &self,
        symbol: &str,
        channel: Channel,
        params: &ChannelParams,
        mode: DeliveryMode,
    ) -> Result<ConnectionToken, BindingError>;

    /// Close a feed previously opened with `bind`
    async fn unbind(&self, token: &ConnectionToken) -> Result<(), BindingError>;
}

/// Shared handle to an exchange connector
pub type SharedBinding = Arc<dyn ExchangeBinding>;

/// In-memory exchange connector
///
/// Tracks open feeds, counts calls and can be told to fail or to be slow.
#[derive(Debug)]
pub struct SimulatedBinding {
    exchange: String,
    latency_ms: AtomicU64,
    next_token: AtomicU64,
    bind_calls: AtomicUsize,
    unbind_calls: AtomicUsize,
    /// Number of upcoming bind calls that will fail
    failing_binds: AtomicUsize,
    /// Number of upcoming unbind calls that will fail
    failing_unbinds: AtomicUsize,
    unbind_always_fails: AtomicBool,
    /// token -> feed description
    open_feeds: Mutex<HashMap<ConnectionToken, String>>,
}

impl SimulatedBinding {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            latency_ms: AtomicU64::new(0),
            next_token: AtomicU64::new(1),
            bind_calls: AtomicUsize::new(0),
            unbind_calls: AtomicUsize::new(0),
            failing_binds: AtomicUsize::new(0),
            failing_unbinds: AtomicUsize::new(0),
            unbind_always_fails: AtomicBool::new(false),
            open_feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Create a shared handle, ready to pass to the coordinator
    pub fn shared(exchange: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(exchange))
    }

    /// Delay every bind/unbind call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_next_binds(&self, count: usize) {
        self.failing_binds.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_unbinds(&self, count: usize) {
        self.failing_unbinds.store(count, Ordering::SeqCst);
    }

    pub fn set_unbind_always_fails(&self, fails: bool) {
        self.unbind_always_fails.store(fails, Ordering::SeqCst);
    }

    pub fn bind_calls(&self) -> usize {
        self.bind_calls.load(Ordering::SeqCst)
    }

    pub fn unbind_calls(&self) -> usize {
        self.unbind_calls.load(Ordering::SeqCst)
    }

    /// Number of feeds currently open at the simulated exchange
    pub fn open_feeds(&self) -> usize {
        self.open_feeds.lock().len()
    }

    pub fn is_open(&self, token: &ConnectionToken) -> bool {
        self.open_feeds.lock().contains_key(token)
    }

    async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    /// Consume one scheduled failure, if any are left
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExchangeBinding for SimulatedBinding {
    fn exchange_id(&self) -> &str {
        &self.exchange
    }

    async fn bind(
        &self,
        symbol: &str,
        channel: Channel,
        params: &ChannelParams,
        mode: DeliveryMode,
    ) -> Result<ConnectionToken, BindingError> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if Self::take_failure(&self.failing_binds) {
            return Err(BindingError::new(
                &self.exchange,
                format!("simulated bind failure for {} {}", symbol, channel),
            ));
        }

        let id = self.next_token.fetch_add(1, Ordering::SeqCst);
        let token = ConnectionToken::new(format!("{}-{}", self.exchange, id));
        let description = format!("{} {} [{}] via {}", symbol, channel, params, mode);

        debug!("[Simulated:{}] bound {} as {}", self.exchange, description, token);
        self.open_feeds.lock().insert(token.clone(), description);

        Ok(token)
    }

    async fn unbind(&self, token: &ConnectionToken) -> Result<(), BindingError> {
        self.unbind_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.unbind_always_fails.load(Ordering::SeqCst)
            || Self::take_failure(&self.failing_unbinds)
        {
            return Err(BindingError::new(
                &self.exchange,
                format!("simulated unbind failure for {}", token),
            ));
        }

        match self.open_feeds.lock().remove(token) {
            Some(description) => {
                debug!("[Simulated:{}] unbound {} ({})", self.exchange, token, description);
                Ok(())
            }
            None => Err(BindingError::new(
                &self.exchange,
                format!("unknown connection token {}", token),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_then_unbind() {
        let binding = SimulatedBinding::new("x");

        let token = binding
            .bind("BTC/USDT", Channel::Ticker, &ChannelParams::empty(), DeliveryMode::Websocket)
            .await
            .unwrap();
        assert!(binding.is_open(&token));
        assert_eq!(binding.open_feeds(), 1);

        binding.unbind(&token).await.unwrap();
        assert!(!binding.is_open(&token));
        assert_eq!(binding.bind_calls(), 1);
        assert_eq!(binding.unbind_calls(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_failures_are_consumed() {
        let binding = SimulatedBinding::new("x");
        binding.fail_next_binds(1);

        let params = ChannelParams::empty();
        assert!(binding
            .bind("BTC/USDT", Channel::Ticker, &params, DeliveryMode::Rest)
            .await
            .is_err());
        let token = binding
            .bind("BTC/USDT", Channel::Ticker, &params, DeliveryMode::Rest)
            .await
            .unwrap();

        binding.fail_next_unbinds(1);
        assert!(binding.unbind(&token).await.is_err());
        assert!(binding.is_open(&token));
        binding.unbind(&token).await.unwrap();
        assert_eq!(binding.open_feeds(), 0);
    }

    #[tokio::test]
    async fn test_unbind_unknown_token_fails() {
        let binding = SimulatedBinding::new("x");
        let err = binding
            .unbind(&ConnectionToken::new("x-404"))
            .await
            .unwrap_err();
        assert_eq!(err.exchange, "x");
    }
}
