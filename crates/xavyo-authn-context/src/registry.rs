//! Thread-safe context registry: map + alias index + optional TTL.
//!
//! One registry is normally attached to one user session (see
//! [`AuthnContextManager`](crate::AuthnContextManager)), but it is equally
//! usable as an explicitly injected process-wide store (see
//! [`SharedContextStore`](crate::SharedContextStore)).
//!
//! Every operation runs under a single `parking_lot::Mutex`, so operations
//! on one registry are linearizable. The expiry decision and the sweep
//! happen under the same lock, which rules out redundant concurrent sweeps.
//!
//! Time-dependent operations come in two flavours: the plain method reads
//! `Utc::now()`, the `*_at` method takes the current time explicitly.

use crate::config::{RegistryConfig, TtlPolicy};
use crate::error::{ContextError, ContextResult};
use crate::key::CorrelationKey;
use crate::map::{ContextMap, PutOutcome};
use crate::rekey::ReKeyIndex;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

struct RegistryState<T> {
    map: ContextMap<T>,
    index: ReKeyIndex,
    /// Time of the last expiry sweep; `None` until the first one.
    last_sweep: Option<DateTime<Utc>>,
    /// Set once the registry has been detached from its session.
    detached: bool,
}

impl<T: PartialEq> RegistryState<T> {
    /// Resolve an alias to its original; originals resolve to themselves.
    fn root<'a>(&'a self, key: &'a CorrelationKey) -> &'a CorrelationKey {
        self.index.original_of(key).unwrap_or(key)
    }

    fn remove_original(&mut self, original: &CorrelationKey) -> bool {
        if self.map.remove(original).is_none() {
            return false;
        }
        let aliases = self.index.take_aliases(original);
        tracing::debug!(
            key = %original.fingerprint(),
            aliases = aliases.len(),
            "Removed authentication context"
        );
        true
    }

    fn sweep(&mut self, ttl: &TtlPolicy, now: DateTime<Utc>) -> usize {
        self.last_sweep = Some(now);
        // A TTL reaching past the representable range never expires anything
        let Some(cutoff) = now.checked_sub_signed(ttl.max_ttl) else {
            return 0;
        };
        let expired = self.map.created_before(cutoff);
        for key in &expired {
            self.map.remove(key);
            self.index.take_aliases(key);
        }
        if !expired.is_empty() {
            tracing::debug!(
                expired = expired.len(),
                remaining = self.map.len(),
                "Swept expired authentication contexts"
            );
        }
        expired.len()
    }

    fn maybe_sweep(&mut self, ttl: Option<&TtlPolicy>, now: DateTime<Utc>) {
        let Some(ttl) = ttl else {
            return;
        };
        let due = self
            .last_sweep
            .map_or(true, |last| now - last >= ttl.cleanup_interval);
        if due {
            self.sweep(ttl, now);
        }
    }
}

/// Correlation-key -> context registry with optional aliasing and expiry.
pub struct ContextRegistry<T> {
    config: RegistryConfig,
    state: Mutex<RegistryState<T>>,
}

impl<T> std::fmt::Debug for ContextRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: PartialEq> ContextRegistry<T> {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RegistryState {
                map: ContextMap::new(),
                index: ReKeyIndex::new(),
                last_sweep: None,
                detached: false,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Bind `key` to `context`.
    ///
    /// # Errors
    ///
    /// - [`ContextError::DuplicateKey`] if `key` (or an alias of that name)
    ///   already names a different context. Binding an equal context again
    ///   is a no-op.
    /// - [`ContextError::Detached`] if the registry has been detached from
    ///   its session.
    pub fn put(&self, key: CorrelationKey, context: impl Into<Arc<T>>) -> ContextResult<()> {
        self.put_at(key, context, Utc::now())
    }

    /// [`put`](Self::put) at an explicit point in time.
    pub fn put_at(
        &self,
        key: CorrelationKey,
        context: impl Into<Arc<T>>,
        now: DateTime<Utc>,
    ) -> ContextResult<()> {
        let context = context.into();
        let mut state = self.state.lock();
        if state.detached {
            return Err(ContextError::Detached);
        }
        state.maybe_sweep(self.config.ttl.as_ref(), now);

        if let Some(original) = state.index.original_of(&key) {
            let same = state
                .map
                .get(original)
                .is_some_and(|entry| *entry.context == *context);
            if same {
                return Ok(());
            }
            tracing::warn!(key = %key.fingerprint(), "Correlation key collides with an alias");
            return Err(ContextError::DuplicateKey(key));
        }

        match state.map.put(key.clone(), context, now) {
            Ok(PutOutcome::Inserted) => {
                tracing::debug!(
                    key = %key.fingerprint(),
                    flows = state.map.len(),
                    "Stored authentication context"
                );
                Ok(())
            }
            Ok(PutOutcome::Unchanged) => Ok(()),
            Err(err) => {
                tracing::warn!(key = %key.fingerprint(), "Correlation key already in use");
                Err(err)
            }
        }
    }

    /// Look up the context named by `key` (an original key or an alias).
    ///
    /// Never mutates the map, except that a TTL registry may run its lazy
    /// expiry sweep first.
    #[must_use]
    pub fn get(&self, key: &CorrelationKey) -> Option<Arc<T>> {
        self.get_at(key, Utc::now())
    }

    /// [`get`](Self::get) at an explicit point in time.
    #[must_use]
    pub fn get_at(&self, key: &CorrelationKey, now: DateTime<Utc>) -> Option<Arc<T>> {
        let mut state = self.state.lock();
        state.maybe_sweep(self.config.ttl.as_ref(), now);
        let root = state.root(key);
        state.map.get(root).map(|entry| Arc::clone(&entry.context))
    }

    /// Whether `key` currently resolves to a context.
    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`.
    ///
    /// An original key takes all of its aliases with it; an alias is
    /// dropped on its own and leaves the original and sibling aliases in
    /// place. Returns `false` if `key` named nothing.
    pub fn remove(&self, key: &CorrelationKey) -> bool {
        self.remove_at(key, Utc::now())
    }

    /// [`remove`](Self::remove) at an explicit point in time.
    pub fn remove_at(&self, key: &CorrelationKey, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        state.maybe_sweep(self.config.ttl.as_ref(), now);
        if state.remove_original(key) {
            return true;
        }
        let detached = state.index.detach_alias(key);
        if detached {
            tracing::debug!(key = %key.fingerprint(), "Removed authentication context alias");
        }
        detached
    }

    /// Remove the whole flow `key` belongs to: its original key and every
    /// alias, whichever of them `key` is.
    ///
    /// Returns `false` if `key` named nothing.
    pub fn remove_flow(&self, key: &CorrelationKey) -> bool {
        self.remove_flow_at(key, Utc::now())
    }

    /// [`remove_flow`](Self::remove_flow) at an explicit point in time.
    pub fn remove_flow_at(&self, key: &CorrelationKey, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        state.maybe_sweep(self.config.ttl.as_ref(), now);
        let root = state.root(key).clone();
        state.remove_original(&root)
    }

    /// Make `new_key` resolve to the same context as `existing`.
    ///
    /// Aliasing an alias links `new_key` to the root original. Linking a key
    /// that already resolves to the same flow is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ContextError::AliasingDisabled`] if the registry has no aliasing.
    /// - [`ContextError::NoSuchContext`] if `existing` names nothing.
    /// - [`ContextError::DuplicateKey`] if `new_key` belongs to another
    ///   flow, whether or not its context compares equal.
    pub fn rekey_alias(
        &self,
        existing: &CorrelationKey,
        new_key: CorrelationKey,
    ) -> ContextResult<()> {
        self.rekey_alias_at(existing, new_key, Utc::now())
    }

    /// [`rekey_alias`](Self::rekey_alias) at an explicit point in time.
    pub fn rekey_alias_at(
        &self,
        existing: &CorrelationKey,
        new_key: CorrelationKey,
        now: DateTime<Utc>,
    ) -> ContextResult<()> {
        if !self.config.aliasing {
            return Err(ContextError::AliasingDisabled(new_key));
        }
        let mut state = self.state.lock();
        state.maybe_sweep(self.config.ttl.as_ref(), now);

        let root = state.root(existing).clone();
        if !state.map.contains(&root) {
            return Err(ContextError::NoSuchContext(existing.clone()));
        }

        let new_root = state.root(&new_key).clone();
        if new_root == root {
            return Ok(());
        }
        // Another flow owns the key, even if its context compares equal
        if state.map.contains(&new_root) {
            tracing::warn!(
                key = %new_key.fingerprint(),
                "Re-key target already belongs to another flow"
            );
            return Err(ContextError::DuplicateKey(new_key));
        }

        tracing::debug!(
            original = %root.fingerprint(),
            alias = %new_key.fingerprint(),
            "Linked authentication context alias"
        );
        state.index.link(&root, new_key);
        Ok(())
    }

    /// Whether no flow is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }

    /// Number of stored flows (aliases are not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    /// Number of alias keys across all flows.
    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.state.lock().index.alias_count()
    }

    /// Aliases linked to the flow `key` belongs to, in link order.
    #[must_use]
    pub fn aliases_of(&self, key: &CorrelationKey) -> Vec<CorrelationKey> {
        let state = self.state.lock();
        let root = state.root(key);
        state.index.aliases_of(root).to_vec()
    }

    /// Run the expiry sweep if the cleanup interval has elapsed.
    pub fn sweep_if_due(&self) {
        self.sweep_if_due_at(Utc::now());
    }

    /// [`sweep_if_due`](Self::sweep_if_due) at an explicit point in time.
    pub fn sweep_if_due_at(&self, now: DateTime<Utc>) {
        self.state.lock().maybe_sweep(self.config.ttl.as_ref(), now);
    }

    /// Run the expiry sweep now, regardless of the cleanup interval.
    ///
    /// Returns the number of flows removed; always 0 without a TTL.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// [`sweep_expired`](Self::sweep_expired) at an explicit point in time.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.config.ttl.as_ref() else {
            return 0;
        };
        self.state.lock().sweep(ttl, now)
    }

    /// Remove every flow and alias. Returns the number of flows removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.map.drain_keys().len();
        state.index.clear();
        removed
    }

    /// Mark the registry detached if it holds no flow.
    ///
    /// A detached registry refuses new contexts with
    /// [`ContextError::Detached`]; its owner is expected to drop it from
    /// the session and start over with a fresh one.
    pub fn detach_if_empty(&self) -> bool {
        let mut state = self.state.lock();
        if state.map.is_empty() {
            state.detached = true;
        }
        state.detached
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }
}
