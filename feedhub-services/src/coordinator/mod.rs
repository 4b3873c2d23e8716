//! Subscription coordinator
//!
//! Shares exchange feeds between strategies. The first strategy asking for a
//! feed opens it at the exchange, later strategies join for free, and the
//! feed is closed when the last one leaves.
//!
//! The registry and the strategy index form one unit of consistency behind a
//! single mutex that is never held across an await. Exchange calls are
//! serialized per key with an async lock, so a slow bind on one feed never
//! blocks work on another.

mod events;
mod locks;

pub use events::CoordinatorEvent;

use chrono::Utc;
use feedhub_core::{Channel, ConnectionState, DeliveryMode, SubscriptionKey, SubscriptionStats};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::binding::{ConnectionToken, SharedBinding};
use crate::config::{CoordinatorConfig, ModeConflictPolicy};
use crate::registry::{CleanupSnapshot, RecordSnapshot, Registry, SubscriptionRecord};
use crate::strategy_index::StrategyIndex;
use crate::{BindingError, ClearFailure, CoordinatorError, CoordinatorResult};
use locks::{KeyGuard, KeyLocks};

/// Proof of a strategy's membership in a feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionHandle {
    pub strategy_id: String,
    pub key: SubscriptionKey,
    /// Delivery mode the feed actually uses (the one chosen at creation)
    pub mode: DeliveryMode,
}

#[derive(Default)]
struct CoordinatorState {
    registry: Registry,
    index: StrategyIndex,
}

enum CleanupOutcome {
    Recovered,
    Failed,
    /// Another retry of the same cleanup is in flight
    Busy,
    /// Cleanup no longer exists
    Gone,
}

struct Inner {
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    key_locks: KeyLocks,
    events: broadcast::Sender<CoordinatorEvent>,
}

/// Reference-counted coordinator of exchange feed subscriptions
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SubscriptionCoordinator {
    inner: Arc<Inner>,
}

impl SubscriptionCoordinator {
    /// Create a new coordinator
    pub fn new(config: CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(CoordinatorState::default()),
                key_locks: KeyLocks::default(),
                events,
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Receive feed lifecycle events from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe a strategy to a feed
    ///
    /// Opens the feed at the exchange if no strategy holds it yet, otherwise
    /// joins the existing feed without any exchange call. Subscribing to a
    /// feed the strategy already holds returns the same handle.
    ///
    /// The exchange call is detached from this future: if the caller gives
    /// up (timeout, drop) the bind still completes and the registry ends up
    /// either holding the record for `strategy_id` or not holding it at all.
    pub async fn subscribe(
        &self,
        strategy_id: &str,
        binding: &SharedBinding,
        symbol: &str,
        channel: Channel,
        params: Option<&Value>,
        mode: DeliveryMode,
    ) -> CoordinatorResult<SubscriptionHandle> {
        let strategy_id = validate_strategy(strategy_id)?;
        let key = SubscriptionKey::canonicalize(binding.exchange_id(), symbol, channel, params)?;

        let guard = self.inner.key_locks.lock(&key).await;

        if let Some(handle) = self.inner.join_existing(&strategy_id, &key, mode)? {
            return Ok(handle);
        }

        let inner = Arc::clone(&self.inner);
        let binding = Arc::clone(binding);
        let task = tokio::spawn(async move {
            inner.open_feed(guard, strategy_id, binding, key, mode).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(CoordinatorError::internal(format!("bind task failed: {}", e))),
        }
    }

    /// Remove a strategy from a feed
    ///
    /// Not holding the feed is a no-op. When the last subscriber leaves, the
    /// feed is closed at the exchange; an unbind failure is not returned
    /// here but kept as a stuck cleanup (see [`Self::failed_cleanups`]).
    pub async fn unsubscribe(
        &self,
        strategy_id: &str,
        binding: &SharedBinding,
        symbol: &str,
        channel: Channel,
        params: Option<&Value>,
    ) -> CoordinatorResult<()> {
        let strategy_id = validate_strategy(strategy_id)?;
        let key = SubscriptionKey::canonicalize(binding.exchange_id(), symbol, channel, params)?;

        self.release(&strategy_id, key).await;
        Ok(())
    }

    /// Unsubscribe a strategy from everything it holds
    pub async fn release_strategy(&self, strategy_id: &str) -> CoordinatorResult<()> {
        let strategy_id = validate_strategy(strategy_id)?;
        let keys = self.inner.state.lock().index.keys(&strategy_id);

        info!(
            "[Coordinator] Releasing {} subscription(s) held by {}",
            keys.len(),
            strategy_id
        );
        for key in keys {
            self.release(&strategy_id, key).await;
        }
        Ok(())
    }

    async fn release(&self, strategy_id: &str, key: SubscriptionKey) {
        let guard = self.inner.key_locks.lock(&key).await;

        let Some((binding, token)) = self.inner.leave(strategy_id, &key) else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.close_feed(guard, key, binding, token).await });
        if let Err(e) = task.await {
            warn!("[Coordinator] Unbind task failed: {}", e);
        }
    }

    /// Close every live feed regardless of refcount and empty both maps
    ///
    /// Each feed is torn down independently; unbind failures are collected
    /// into [`CoordinatorError::Clear`] and kept as stuck cleanups.
    pub async fn clear(&self) -> CoordinatorResult<()> {
        let keys = self.inner.state.lock().registry.keys();
        info!("[Coordinator] Clearing {} subscription(s)", keys.len());

        let tasks = keys.into_iter().map(|key| {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.clear_key(key).await })
        });

        let mut failures = Vec::new();
        for result in join_all(tasks).await {
            match result {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(e) => warn!("[Coordinator] Clear task failed: {}", e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(
                "[Coordinator] Clear finished with {} failed unbind(s)",
                failures.len()
            );
            Err(CoordinatorError::Clear { failures })
        }
    }

    /// Retry every stuck cleanup once; returns how many succeeded
    ///
    /// Each attempt runs in its own task: dropping this future does not
    /// abandon an unbind that is already in flight.
    pub async fn retry_failed_cleanups(&self) -> usize {
        let ids = self.inner.state.lock().registry.failed_ids();
        let tasks = ids.into_iter().map(|id| {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.attempt_cleanup(id).await })
        });

        join_all(tasks)
            .await
            .into_iter()
            .filter(|outcome| matches!(outcome, Ok(CleanupOutcome::Recovered)))
            .count()
    }

    /// Consistent snapshot of the registry
    pub fn stats(&self) -> SubscriptionStats {
        self.inner.state.lock().registry.stats()
    }

    /// Feeds held by a strategy, in the order it subscribed
    pub fn strategy_subscriptions(&self, strategy_id: &str) -> Vec<(SubscriptionKey, DeliveryMode)> {
        let state = self.inner.state.lock();
        state
            .index
            .keys(strategy_id)
            .into_iter()
            .filter_map(|key| {
                let mode = state.registry.get(&key)?.mode;
                Some((key, mode))
            })
            .collect()
    }

    pub fn subscribers(&self, key: &SubscriptionKey) -> Vec<String> {
        self.inner
            .state
            .lock()
            .registry
            .get(key)
            .map(|record| record.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.inner
            .state
            .lock()
            .registry
            .get(key)
            .map(|record| record.refcount())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, strategy_id: &str, key: &SubscriptionKey) -> bool {
        self.inner.state.lock().index.holds(strategy_id, key)
    }

    pub fn record(&self, key: &SubscriptionKey) -> Option<RecordSnapshot> {
        self.inner
            .state
            .lock()
            .registry
            .get(key)
            .map(SubscriptionRecord::snapshot)
    }

    /// `None` once the feed is closed (or was never opened)
    pub fn connection_state(&self, key: &SubscriptionKey) -> Option<ConnectionState> {
        self.inner.state.lock().registry.state_of(key)
    }

    pub fn failed_cleanups(&self) -> Vec<CleanupSnapshot> {
        self.inner.state.lock().registry.failed_snapshots()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    /// Strategies currently holding at least one feed
    pub fn total_strategies(&self) -> usize {
        self.inner.state.lock().index.strategy_count()
    }
}

impl Default for SubscriptionCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl std::fmt::Debug for SubscriptionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionCoordinator")
            .field("total_subscriptions", &self.total_subscriptions())
            .field("total_strategies", &self.total_strategies())
            .field("mode_conflict_policy", &self.inner.config.mode_conflict_policy)
            .finish()
    }
}

impl Inner {
    /// Add a strategy to an existing feed; `None` if the feed does not exist
    fn join_existing(
        &self,
        strategy_id: &str,
        key: &SubscriptionKey,
        mode: DeliveryMode,
    ) -> CoordinatorResult<Option<SubscriptionHandle>> {
        let (existing, added, refcount) = {
            let mut state = self.state.lock();
            let CoordinatorState { registry, index } = &mut *state;

            let Some(record) = registry.get_mut(key) else {
                return Ok(None);
            };

            let existing = record.mode;
            if existing != mode && self.config.mode_conflict_policy == ModeConflictPolicy::Reject {
                warn!(
                    "[Coordinator] ModeConflict on {}: {} requested {}, feed uses {} (rejected)",
                    key, strategy_id, mode, existing
                );
                return Err(CoordinatorError::ModeConflict {
                    key: key.clone(),
                    existing,
                    requested: mode,
                });
            }

            let added = record.subscribers.insert(strategy_id.to_string());
            index.insert(strategy_id, key.clone());
            (existing, added, record.refcount())
        };

        if existing != mode {
            warn!(
                "[Coordinator] ModeConflict on {}: {} requested {}, keeping {}",
                key, strategy_id, mode, existing
            );
            self.emit(CoordinatorEvent::ModeConflict {
                key: key.clone(),
                strategy_id: strategy_id.to_string(),
                existing,
                requested: mode,
            });
        }

        if added {
            debug!(
                "[Coordinator] {} joined {} (refcount {})",
                strategy_id, key, refcount
            );
        } else {
            debug!("[Coordinator] {} already subscribed to {}", strategy_id, key);
        }

        Ok(Some(SubscriptionHandle {
            strategy_id: strategy_id.to_string(),
            key: key.clone(),
            mode: existing,
        }))
    }

    /// First reference: bind at the exchange, register only on success
    async fn open_feed(
        &self,
        guard: KeyGuard,
        strategy_id: String,
        binding: SharedBinding,
        key: SubscriptionKey,
        mode: DeliveryMode,
    ) -> CoordinatorResult<SubscriptionHandle> {
        let transition = Transition::begin(&self.state, &key, ConnectionState::Pending);
        info!(
            "[Coordinator] Binding {} via {} for {}",
            key, mode, strategy_id
        );

        let result = binding
            .bind(&key.symbol, key.channel, &key.params, mode)
            .await;

        let result = {
            let mut state = self.state.lock();
            transition.finish(&mut state);
            result.map(|token| {
                state.index.insert(&strategy_id, key.clone());
                state.registry.insert(SubscriptionRecord::new(
                    key.clone(),
                    mode,
                    strategy_id.clone(),
                    token.clone(),
                    binding,
                ));
                token
            })
        };
        drop(guard);

        match result {
            Ok(token) => {
                info!("[Coordinator] Bound {} as {}", key, token);
                self.emit(CoordinatorEvent::Bound {
                    key: key.clone(),
                    mode,
                    strategy_id: strategy_id.clone(),
                    token,
                });
                Ok(SubscriptionHandle {
                    strategy_id,
                    key,
                    mode,
                })
            }
            Err(e) => {
                warn!("[Coordinator] Failed to bind {}: {}", key, e);
                self.emit(CoordinatorEvent::BindFailed {
                    key,
                    strategy_id,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Drop a membership; returns the feed to close if it was the last one
    fn leave(
        &self,
        strategy_id: &str,
        key: &SubscriptionKey,
    ) -> Option<(SharedBinding, ConnectionToken)> {
        let mut state = self.state.lock();
        let CoordinatorState { registry, index } = &mut *state;

        let Some(record) = registry.get_mut(key) else {
            debug!("[Coordinator] {} not subscribed to {}, ignoring", strategy_id, key);
            return None;
        };
        if !record.subscribers.shift_remove(strategy_id) {
            debug!("[Coordinator] {} not subscribed to {}, ignoring", strategy_id, key);
            return None;
        }
        index.remove(strategy_id, key);

        if record.refcount() > 0 {
            debug!(
                "[Coordinator] {} left {} (refcount {})",
                strategy_id,
                key,
                record.refcount()
            );
            return None;
        }

        let record = registry.remove(key)?;
        registry.begin_transition(key, ConnectionState::Closing);
        Some((record.binding, record.token))
    }

    /// Last reference gone: unbind, keeping the cleanup on failure
    async fn close_feed(
        self: &Arc<Self>,
        guard: KeyGuard,
        key: SubscriptionKey,
        binding: SharedBinding,
        token: ConnectionToken,
    ) -> Result<(), BindingError> {
        // `Closing` was entered when the record was removed
        let transition = Transition::adopt(&self.state, &key);
        info!("[Coordinator] Unbinding {} ({})", key, token);
        let result = binding.unbind(&token).await;

        let failed_id = {
            let mut state = self.state.lock();
            transition.finish(&mut state);
            result.as_ref().err().map(|e| {
                state
                    .registry
                    .push_failed(key.clone(), token.clone(), Arc::clone(&binding), e.clone())
            })
        };
        drop(guard);

        match result {
            Ok(()) => {
                info!("[Coordinator] Unbound {}", key);
                self.emit(CoordinatorEvent::Unbound { key, token });
                Ok(())
            }
            Err(e) => {
                warn!(
                    "[Coordinator] Failed to unbind {} ({}), keeping it for retry: {}",
                    key, token, e
                );
                self.emit(CoordinatorEvent::UnbindFailed {
                    key,
                    token,
                    attempts: 1,
                    error: e.to_string(),
                });
                if let Some(id) = failed_id {
                    if self.config.retry.is_enabled() {
                        self.spawn_cleanup_retry(id);
                    }
                }
                Err(e)
            }
        }
    }

    async fn clear_key(self: Arc<Self>, key: SubscriptionKey) -> Option<ClearFailure> {
        let guard = self.key_locks.lock(&key).await;

        let (binding, token) = {
            let mut state = self.state.lock();
            let CoordinatorState { registry, index } = &mut *state;

            // Released by a concurrent unsubscribe in the meantime
            let record = registry.remove(&key)?;
            for strategy_id in &record.subscribers {
                index.remove(strategy_id, &key);
            }
            registry.begin_transition(&key, ConnectionState::Closing);
            (record.binding, record.token)
        };

        self.close_feed(guard, key.clone(), binding, token)
            .await
            .err()
            .map(|error| ClearFailure { key, error })
    }

    fn spawn_cleanup_retry(self: &Arc<Self>, id: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let retry = inner.config.retry.clone();
            for attempt in 1..=retry.max_retries {
                tokio::time::sleep(retry.delay_for(attempt)).await;
                match inner.attempt_cleanup(id).await {
                    CleanupOutcome::Recovered | CleanupOutcome::Gone => return,
                    CleanupOutcome::Failed | CleanupOutcome::Busy => {}
                }
            }
            warn!(
                "[Coordinator] Giving up automatic retries for cleanup #{}, it stays in error state",
                id
            );
        });
    }

    async fn attempt_cleanup(&self, id: u64) -> CleanupOutcome {
        let (key, token, binding) = {
            let mut state = self.state.lock();
            match state.registry.failed_mut(id) {
                None => return CleanupOutcome::Gone,
                Some(cleanup) if cleanup.retrying => return CleanupOutcome::Busy,
                Some(cleanup) => {
                    cleanup.retrying = true;
                    (
                        cleanup.key.clone(),
                        cleanup.token.clone(),
                        Arc::clone(&cleanup.binding),
                    )
                }
            }
        };

        let mut attempt = RetryAttempt {
            state: &self.state,
            id,
            settled: false,
        };
        debug!("[Coordinator] Retrying unbind of {} ({})", key, token);
        let result = binding.unbind(&token).await;

        match result {
            Ok(()) => {
                let attempts = {
                    let mut state = self.state.lock();
                    attempt.settled = true;
                    state
                        .registry
                        .take_failed(id)
                        .map(|cleanup| cleanup.attempts + 1)
                        .unwrap_or(0)
                };
                info!(
                    "[Coordinator] Cleanup of {} recovered after {} attempt(s)",
                    key, attempts
                );
                self.emit(CoordinatorEvent::CleanupRecovered {
                    key,
                    token,
                    attempts,
                });
                CleanupOutcome::Recovered
            }
            Err(e) => {
                let attempts = {
                    let mut state = self.state.lock();
                    attempt.settled = true;
                    match state.registry.failed_mut(id) {
                        Some(cleanup) => {
                            cleanup.attempts += 1;
                            cleanup.last_error = e.clone();
                            cleanup.failed_at = Utc::now();
                            cleanup.retrying = false;
                            cleanup.attempts
                        }
                        None => 0,
                    }
                };
                warn!(
                    "[Coordinator] Unbind retry of {} failed (attempt {}): {}",
                    key, attempts, e
                );
                self.emit(CoordinatorEvent::UnbindFailed {
                    key,
                    token,
                    attempts,
                    error: e.to_string(),
                });
                CleanupOutcome::Failed
            }
        }
    }

    fn emit(&self, event: CoordinatorEvent) {
        // Err only means nobody is listening
        let _ = self.events.send(event);
    }
}

/// In-flight transition of a key, cleared on drop
///
/// The exchange call may never return normally (the adapter panics), so the
/// `Pending`/`Closing` entry must not depend on reaching the end of it.
struct Transition<'a> {
    state: &'a Mutex<CoordinatorState>,
    key: SubscriptionKey,
    finished: bool,
}

impl<'a> Transition<'a> {
    fn begin(
        state: &'a Mutex<CoordinatorState>,
        key: &SubscriptionKey,
        to: ConnectionState,
    ) -> Self {
        state.lock().registry.begin_transition(key, to);
        Self::adopt(state, key)
    }

    /// Take over a transition already entered under the state lock
    fn adopt(state: &'a Mutex<CoordinatorState>, key: &SubscriptionKey) -> Self {
        Self {
            state,
            key: key.clone(),
            finished: false,
        }
    }

    /// End the transition while the caller holds the state lock
    fn finish(mut self, state: &mut CoordinatorState) {
        state.registry.end_transition(&self.key);
        self.finished = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.lock().registry.end_transition(&self.key);
        }
    }
}

/// Marks a cleanup retry in flight; releases the `retrying` flag on drop
/// unless the attempt settled it
struct RetryAttempt<'a> {
    state: &'a Mutex<CoordinatorState>,
    id: u64,
    settled: bool,
}

impl Drop for RetryAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(cleanup) = self.state.lock().registry.failed_mut(self.id) {
            cleanup.retrying = false;
        }
    }
}

fn validate_strategy(strategy_id: &str) -> CoordinatorResult<String> {
    let trimmed = strategy_id.trim();
    if trimmed.is_empty() {
        return Err(CoordinatorError::invalid_request("strategy id is empty"));
    }
    Ok(trimmed.to_string())
}
