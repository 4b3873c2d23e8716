//! Subscription registry
//!
//! Authoritative map from [`SubscriptionKey`] to the live record of that
//! feed. Alongside the live records it tracks keys whose bind/unbind call is
//! in flight and feeds whose unbind failed and still need cleaning up at the
//! exchange. A live record always has at least one subscriber; records are
//! removed, never kept at zero.

use chrono::{DateTime, Utc};
use feedhub_core::{ConnectionState, DeliveryMode, SubscriptionKey, SubscriptionStats};
use indexmap::IndexSet;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::binding::{ConnectionToken, SharedBinding};
use crate::BindingError;

/// Live feed shared by one or more strategies
pub(crate) struct SubscriptionRecord {
    pub key: SubscriptionKey,
    pub mode: DeliveryMode,
    /// Strategies holding this feed, in subscription order
    pub subscribers: IndexSet<String>,
    pub token: ConnectionToken,
    /// Connector that opened the feed; also used to close it
    pub binding: SharedBinding,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn new(
        key: SubscriptionKey,
        mode: DeliveryMode,
        first_subscriber: String,
        token: ConnectionToken,
        binding: SharedBinding,
    ) -> Self {
        let mut subscribers = IndexSet::new();
        subscribers.insert(first_subscriber);
        Self {
            key,
            mode,
            subscribers,
            token,
            binding,
            created_at: Utc::now(),
        }
    }

    pub fn refcount(&self) -> usize {
        self.subscribers.len()
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            key: self.key.clone(),
            mode: self.mode,
            subscribers: self.subscribers.iter().cloned().collect(),
            refcount: self.refcount(),
            state: ConnectionState::Active,
            token: self.token.clone(),
            created_at: self.created_at,
        }
    }
}

/// Read-only copy of a live record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub key: SubscriptionKey,
    pub mode: DeliveryMode,
    pub subscribers: Vec<String>,
    pub refcount: usize,
    pub state: ConnectionState,
    pub token: ConnectionToken,
    pub created_at: DateTime<Utc>,
}

/// Exchange feed whose unbind failed
pub(crate) struct FailedCleanup {
    pub key: SubscriptionKey,
    pub token: ConnectionToken,
    pub binding: SharedBinding,
    /// Unbind attempts made so far, including the original one
    pub attempts: u32,
    pub last_error: BindingError,
    pub failed_at: DateTime<Utc>,
    /// An unbind retry is currently in flight
    pub retrying: bool,
}

/// Read-only copy of a stuck cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSnapshot {
    pub id: u64,
    pub key: SubscriptionKey,
    pub token: ConnectionToken,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct Registry {
    records: HashMap<SubscriptionKey, SubscriptionRecord>,
    /// Keys with a bind (`Pending`) or unbind (`Closing`) call in flight
    transitions: HashMap<SubscriptionKey, ConnectionState>,
    failed: BTreeMap<u64, FailedCleanup>,
    next_cleanup_id: u64,
}

impl Registry {
    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &SubscriptionKey) -> Option<&mut SubscriptionRecord> {
        self.records.get_mut(key)
    }

    pub fn insert(&mut self, record: SubscriptionRecord) {
        debug_assert!(record.refcount() > 0, "record inserted without subscribers");
        self.records.insert(record.key.clone(), record);
    }

    pub fn remove(&mut self, key: &SubscriptionKey) -> Option<SubscriptionRecord> {
        self.records.remove(key)
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.records.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn begin_transition(&mut self, key: &SubscriptionKey, state: ConnectionState) {
        self.transitions.insert(key.clone(), state);
    }

    pub fn end_transition(&mut self, key: &SubscriptionKey) {
        self.transitions.remove(key);
    }

    /// Current state of a key: in-flight transition first, then live record,
    /// then a stuck cleanup
    pub fn state_of(&self, key: &SubscriptionKey) -> Option<ConnectionState> {
        if let Some(state) = self.transitions.get(key) {
            return Some(*state);
        }
        if self.records.contains_key(key) {
            return Some(ConnectionState::Active);
        }
        if self.failed.values().any(|c| &c.key == key) {
            return Some(ConnectionState::Error);
        }
        None
    }

    pub fn push_failed(
        &mut self,
        key: SubscriptionKey,
        token: ConnectionToken,
        binding: SharedBinding,
        error: BindingError,
    ) -> u64 {
        self.next_cleanup_id += 1;
        let id = self.next_cleanup_id;
        self.failed.insert(
            id,
            FailedCleanup {
                key,
                token,
                binding,
                attempts: 1,
                last_error: error,
                failed_at: Utc::now(),
                retrying: false,
            },
        );
        id
    }

    pub fn failed_mut(&mut self, id: u64) -> Option<&mut FailedCleanup> {
        self.failed.get_mut(&id)
    }

    pub fn take_failed(&mut self, id: u64) -> Option<FailedCleanup> {
        self.failed.remove(&id)
    }

    pub fn failed_ids(&self) -> Vec<u64> {
        self.failed.keys().copied().collect()
    }

    pub fn failed_snapshots(&self) -> Vec<CleanupSnapshot> {
        self.failed
            .iter()
            .map(|(id, cleanup)| CleanupSnapshot {
                id: *id,
                key: cleanup.key.clone(),
                token: cleanup.token.clone(),
                attempts: cleanup.attempts,
                last_error: cleanup.last_error.to_string(),
                failed_at: cleanup.failed_at,
            })
            .collect()
    }

    pub fn stats(&self) -> SubscriptionStats {
        let mut stats = SubscriptionStats::default();

        for record in self.records.values() {
            stats.total_subscriptions += 1;
            stats.total_subscriber_slots += record.refcount();
            *stats
                .by_channel
                .entry(record.key.channel.to_string())
                .or_insert(0) += 1;
            *stats
                .by_exchange
                .entry(record.key.exchange.clone())
                .or_insert(0) += 1;
        }

        if !self.records.is_empty() {
            stats
                .by_state
                .insert(ConnectionState::Active.to_string(), self.records.len());
        }
        for state in self.transitions.values() {
            *stats.by_state.entry(state.to_string()).or_insert(0) += 1;
        }
        if !self.failed.is_empty() {
            stats
                .by_state
                .insert(ConnectionState::Error.to_string(), self.failed.len());
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::SimulatedBinding;
    use feedhub_core::Channel;
    use std::sync::Arc;

    fn key(symbol: &str, channel: Channel) -> SubscriptionKey {
        SubscriptionKey::canonicalize("x", symbol, channel, None).unwrap()
    }

    fn record(key: SubscriptionKey, strategy: &str) -> SubscriptionRecord {
        let binding: SharedBinding = Arc::new(SimulatedBinding::new("x"));
        SubscriptionRecord::new(
            key,
            DeliveryMode::Websocket,
            strategy.to_string(),
            ConnectionToken::new("x-1"),
            binding,
        )
    }

    #[test]
    fn test_refcount_tracks_subscriber_set() {
        let mut rec = record(key("BTC/USDT", Channel::Ticker), "a");
        assert_eq!(rec.refcount(), 1);

        rec.subscribers.insert("b".to_string());
        rec.subscribers.insert("b".to_string());
        assert_eq!(rec.refcount(), 2);

        let snapshot = rec.snapshot();
        assert_eq!(snapshot.subscribers, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(snapshot.refcount, 2);
    }

    #[test]
    fn test_stats_cover_live_in_flight_and_failed() {
        let mut registry = Registry::default();
        let ticker = key("BTC/USDT", Channel::Ticker);
        let trades = key("ETH/USDT", Channel::Trades);

        registry.insert(record(ticker.clone(), "a"));
        registry.get_mut(&ticker).unwrap().subscribers.insert("b".to_string());
        registry.begin_transition(&trades, ConnectionState::Pending);

        let binding: SharedBinding = Arc::new(SimulatedBinding::new("x"));
        registry.push_failed(
            key("SOL/USDT", Channel::Klines),
            ConnectionToken::new("x-9"),
            binding,
            BindingError::new("x", "boom"),
        );

        let stats = registry.stats();
        assert_eq!(stats.total_subscriptions, 1);
        assert_eq!(stats.total_subscriber_slots, 2);
        assert_eq!(stats.channel_count(Channel::Ticker), 1);
        assert_eq!(stats.exchange_count("x"), 1);
        assert_eq!(stats.state_count(ConnectionState::Active), 1);
        assert_eq!(stats.state_count(ConnectionState::Pending), 1);
        assert_eq!(stats.state_count(ConnectionState::Error), 1);

        assert_eq!(registry.state_of(&trades), Some(ConnectionState::Pending));
        assert_eq!(registry.state_of(&ticker), Some(ConnectionState::Active));
        assert_eq!(
            registry.state_of(&key("SOL/USDT", Channel::Klines)),
            Some(ConnectionState::Error)
        );
        assert_eq!(registry.state_of(&key("XRP/USDT", Channel::Ticker)), None);
    }

    #[test]
    fn test_failed_cleanup_lifecycle() {
        let mut registry = Registry::default();
        let binding: SharedBinding = Arc::new(SimulatedBinding::new("x"));
        let id = registry.push_failed(
            key("BTC/USDT", Channel::Ticker),
            ConnectionToken::new("x-1"),
            binding,
            BindingError::new("x", "timeout"),
        );

        assert_eq!(registry.failed_ids(), vec![id]);
        let snapshots = registry.failed_snapshots();
        assert_eq!(snapshots[0].attempts, 1);
        assert!(snapshots[0].last_error.contains("timeout"));

        assert!(registry.take_failed(id).is_some());
        assert!(registry.failed_ids().is_empty());
        assert!(registry.stats().by_state.is_empty());
    }
}
