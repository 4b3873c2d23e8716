//! Reverse index from strategy to the feeds it holds

use feedhub_core::SubscriptionKey;
use indexmap::IndexSet;
use std::collections::HashMap;

/// strategy -> keys, in the order the strategy subscribed
///
/// Kept in lockstep with the registry's subscriber sets by the coordinator.
/// Strategies holding nothing have no entry.
#[derive(Debug, Default)]
pub(crate) struct StrategyIndex {
    entries: HashMap<String, IndexSet<SubscriptionKey>>,
}

impl StrategyIndex {
    /// Returns `false` if the strategy already held the key
    pub fn insert(&mut self, strategy_id: &str, key: SubscriptionKey) -> bool {
        self.entries
            .entry(strategy_id.to_string())
            .or_default()
            .insert(key)
    }

    /// Returns `false` if the strategy did not hold the key
    pub fn remove(&mut self, strategy_id: &str, key: &SubscriptionKey) -> bool {
        let Some(keys) = self.entries.get_mut(strategy_id) else {
            return false;
        };
        let removed = keys.shift_remove(key);
        if keys.is_empty() {
            self.entries.remove(strategy_id);
        }
        removed
    }

    pub fn holds(&self, strategy_id: &str, key: &SubscriptionKey) -> bool {
        self.entries
            .get(strategy_id)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    pub fn keys(&self, strategy_id: &str) -> Vec<SubscriptionKey> {
        self.entries
            .get(strategy_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of strategies holding at least one feed
    pub fn strategy_count(&self) -> usize {
        self.entries.len()
    }

    /// Every (strategy, key) pair, used for consistency checks
    #[cfg(test)]
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &SubscriptionKey)> {
        self.entries
            .iter()
            .flat_map(|(strategy, keys)| keys.iter().map(move |key| (strategy.as_str(), key)))
    }
}
