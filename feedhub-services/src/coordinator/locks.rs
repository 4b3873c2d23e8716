//! Per-key async locks
//!
//! Operations on the same key queue behind one `tokio::sync::Mutex` held
//! across the exchange call; operations on different keys never contend.
//! Lock entries are removed once nobody holds or waits on them.

use dashmap::DashMap;
use feedhub_core::SubscriptionKey;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<SubscriptionKey, Arc<Mutex<()>>>;

#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Arc<LockMap>,
}

impl KeyLocks {
    /// Wait for exclusive access to `key`
    ///
    /// The returned guard exists before the wait starts, so a waiter dropped
    /// mid-wait still prunes the entry on its way out.
    pub async fn lock(&self, key: &SubscriptionKey) -> KeyGuard {
        let mutex = self.locks.entry(key.clone()).or_default().value().clone();
        let mut key_guard = KeyGuard {
            key: key.clone(),
            guard: None,
            locks: Arc::clone(&self.locks),
        };
        key_guard.guard = Some(mutex.lock_owned().await);
        key_guard
    }

    /// Number of keys currently locked or waited on
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one key; `Send + 'static` so it can move into a task
pub(crate) struct KeyGuard {
    key: SubscriptionKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release before the strong-count check so only the map's handle and
        // any waiters are counted.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedhub_core::Channel;
    use std::time::Duration;

    fn key(symbol: &str) -> SubscriptionKey {
        SubscriptionKey::canonicalize("x", symbol, Channel::Ticker, None).unwrap()
    }

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = KeyLocks::default();
        let guard = locks.lock(&key("BTC/USDT")).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_leak_entry() {
        let locks = KeyLocks::default();
        let holder = locks.lock(&key("BTC/USDT")).await;

        let waiter_key = key("BTC/USDT");
        let mut waiter = Box::pin(locks.lock(&waiter_key));
        assert!(futures::poll!(waiter.as_mut()).is_pending());

        // Holder leaves while the waiter still counts as a user of the entry
        drop(holder);
        assert_eq!(locks.len(), 1);

        drop(waiter);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_key_waits_different_key_does_not() {
        let locks = Arc::new(KeyLocks::default());
        let guard = locks.lock(&key("BTC/USDT")).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock(&key("ETH/USDT"))).await;
        assert!(other.is_ok());
        drop(other);

        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(&key("BTC/USDT"))).await;
        assert!(same.is_err());

        drop(guard);
        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(&key("BTC/USDT"))).await;
        assert!(same.is_ok());
        drop(same);
        assert_eq!(locks.len(), 0);
    }
}
