//! Subscription keys
//!
//! A [`SubscriptionKey`] is the canonical identity of a data feed:
//! exchange, symbol, channel and canonical parameters. Keys are used as map
//! identities by the coordinator, so building one is a pure function of its
//! input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::params::escape_component;
use crate::{Channel, ChannelParams, FeedError, FeedResult};

/// Unique key for a data feed (used by the subscription registry)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Lowercased exchange identity, e.g. `binance`
    pub exchange: String,
    /// Exchange-native symbol, e.g. `BTC/USDT` or `BTCUSDT`
    pub symbol: String,
    pub channel: Channel,
    pub params: ChannelParams,
}

impl SubscriptionKey {
    /// Canonicalize a raw request into a key
    ///
    /// The exchange identity is trimmed and lowercased, the symbol is only
    /// trimmed. Params may be `None`, `null` or a flat JSON object.
    pub fn canonicalize(
        exchange: &str,
        symbol: &str,
        channel: Channel,
        params: Option<&Value>,
    ) -> FeedResult<Self> {
        let params = ChannelParams::from_json(params)?;
        Self::with_params(exchange, symbol, channel, params)
    }

    /// Same as [`SubscriptionKey::canonicalize`] but parses the channel name
    pub fn canonicalize_str(
        exchange: &str,
        symbol: &str,
        channel: &str,
        params: Option<&Value>,
    ) -> FeedResult<Self> {
        if channel.trim().is_empty() {
            return Err(FeedError::invalid_request("channel is empty"));
        }
        let channel: Channel = channel
            .parse()
            .map_err(|e: FeedError| FeedError::invalid_request(e.to_string()))?;
        Self::canonicalize(exchange, symbol, channel, params)
    }

    /// Build a key from already-canonical parameters
    pub fn with_params(
        exchange: &str,
        symbol: &str,
        channel: Channel,
        params: ChannelParams,
    ) -> FeedResult<Self> {
        let exchange = exchange.trim().to_lowercase();
        if exchange.is_empty() {
            return Err(FeedError::invalid_request("exchange identity is empty"));
        }

        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(FeedError::invalid_request("symbol is empty"));
        }

        Ok(Self {
            exchange,
            symbol: symbol.to_string(),
            channel,
            params,
        })
    }

    /// Stable textual fingerprint: `exchange|symbol|channel|params`
    ///
    /// Separators inside components are percent-escaped; unequal keys have
    /// unequal fingerprints.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            escape_component(&self.exchange),
            escape_component(&self.symbol),
            self.channel.as_str(),
            self.params.canonical()
        )
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}
