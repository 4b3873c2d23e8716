//! Stats payload exposed to observability consumers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Channel, ConnectionState};

/// Point-in-time view of the subscription registry
///
/// Serialized as
/// `{ totalSubscriptions, totalSubscriberSlots, byChannel, byExchange, byState }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    /// Distinct live feeds
    pub total_subscriptions: usize,
    /// Sum of refcounts over live feeds
    pub total_subscriber_slots: usize,
    /// Live feeds per channel
    pub by_channel: BTreeMap<String, usize>,
    /// Live feeds per exchange
    pub by_exchange: BTreeMap<String, usize>,
    /// Feeds per connection state, including in-flight and stuck cleanups
    pub by_state: BTreeMap<String, usize>,
}

impl SubscriptionStats {
    pub fn channel_count(&self, channel: Channel) -> usize {
        self.by_channel.get(channel.as_str()).copied().unwrap_or(0)
    }

    pub fn exchange_count(&self, exchange: &str) -> usize {
        self.by_exchange.get(exchange).copied().unwrap_or(0)
    }

    pub fn state_count(&self, state: ConnectionState) -> usize {
        self.by_state.get(state.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_camel_case_fields() {
        let mut stats = SubscriptionStats {
            total_subscriptions: 2,
            total_subscriber_slots: 3,
            ..Default::default()
        };
        stats.by_channel.insert("ticker".to_string(), 1);
        stats.by_channel.insert("klines".to_string(), 1);
        stats.by_exchange.insert("x".to_string(), 2);
        stats.by_state.insert("active".to_string(), 2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalSubscriptions"], 2);
        assert_eq!(json["totalSubscriberSlots"], 3);
        assert_eq!(json["byChannel"]["klines"], 1);
        assert_eq!(json["byExchange"]["x"], 2);
        assert_eq!(json["byState"]["active"], 2);
    }

    #[test]
    fn test_missing_buckets_count_as_zero() {
        let stats = SubscriptionStats::default();
        assert_eq!(stats.channel_count(Channel::Trades), 0);
        assert_eq!(stats.exchange_count("nowhere"), 0);
        assert_eq!(stats.state_count(ConnectionState::Error), 0);
    }
}
