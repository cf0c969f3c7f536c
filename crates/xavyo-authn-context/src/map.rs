//! Plain key -> context map.
//!
//! No locking, no aliasing and no expiry: those are layered on top by
//! [`ContextRegistry`](crate::ContextRegistry).

use crate::error::{ContextError, ContextResult};
use crate::key::CorrelationKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// A stored context and the time it was first bound.
#[derive(Debug)]
pub struct ContextEntry<T> {
    pub context: Arc<T>,
    pub created_at: DateTime<Utc>,
}

// Manual impl: `Arc<T>` is `Clone` for any `T`.
impl<T> Clone for ContextEntry<T> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            created_at: self.created_at,
        }
    }
}

/// Outcome of [`ContextMap::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was created.
    Inserted,
    /// The key already held an equal context; nothing changed.
    Unchanged,
}

/// Mapping from correlation key to context.
#[derive(Debug)]
pub struct ContextMap<T> {
    entries: HashMap<CorrelationKey, ContextEntry<T>>,
}

impl<T> Default for ContextMap<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: PartialEq> ContextMap<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `context`.
    ///
    /// Re-binding an equal context is a no-op (re-entrant redirects); binding
    /// a different one fails with [`ContextError::DuplicateKey`]. The original
    /// `created_at` is kept on a no-op.
    pub fn put(
        &mut self,
        key: CorrelationKey,
        context: Arc<T>,
        now: DateTime<Utc>,
    ) -> ContextResult<PutOutcome> {
        if let Some(existing) = self.entries.get(&key) {
            if Arc::ptr_eq(&existing.context, &context) || *existing.context == *context {
                return Ok(PutOutcome::Unchanged);
            }
            return Err(ContextError::DuplicateKey(key));
        }
        self.entries.insert(
            key,
            ContextEntry {
                context,
                created_at: now,
            },
        );
        Ok(PutOutcome::Inserted)
    }

    /// Pure lookup.
    #[must_use]
    pub fn get(&self, key: &CorrelationKey) -> Option<&ContextEntry<T>> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &CorrelationKey) -> Option<ContextEntry<T>> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Keys whose entries were created strictly before `cutoff`.
    #[must_use]
    pub fn created_before(&self, cutoff: DateTime<Utc>) -> Vec<CorrelationKey> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove everything, returning the removed keys.
    pub fn drain_keys(&mut self) -> Vec<CorrelationKey> {
        self.entries.drain().map(|(key, _)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(s: &str) -> CorrelationKey {
        CorrelationKey::from(s)
    }

    #[test]
    fn test_put_and_get() {
        let mut map = ContextMap::new();
        let now = Utc::now();
        let outcome = map.put(key("k1"), Arc::new("idp=foo"), now).unwrap();
        assert_eq!(outcome, PutOutcome::Inserted);

        let entry = map.get(&key("k1")).unwrap();
        assert_eq!(*entry.context, "idp=foo");
        assert_eq!(entry.created_at, now);
        assert!(map.get(&key("k2")).is_none());
    }

    #[test]
    fn test_put_equal_context_is_idempotent() {
        let mut map = ContextMap::new();
        let t0 = Utc::now();
        map.put(key("k1"), Arc::new("idp=foo"), t0).unwrap();

        let outcome = map
            .put(key("k1"), Arc::new("idp=foo"), t0 + Duration::minutes(5))
            .unwrap();
        assert_eq!(outcome, PutOutcome::Unchanged);
        assert_eq!(map.len(), 1);
        // Creation time of the first binding is kept
        assert_eq!(map.get(&key("k1")).unwrap().created_at, t0);
    }

    #[test]
    fn test_put_different_context_fails() {
        let mut map = ContextMap::new();
        map.put(key("k1"), Arc::new("idp=foo"), Utc::now()).unwrap();

        let result = map.put(key("k1"), Arc::new("idp=bar"), Utc::now());
        assert_eq!(result, Err(ContextError::DuplicateKey(key("k1"))));
        assert_eq!(*map.get(&key("k1")).unwrap().context, "idp=foo");
    }

    #[test]
    fn test_remove_and_is_empty() {
        let mut map = ContextMap::new();
        assert!(map.is_empty());
        map.put(key("k1"), Arc::new(1), Utc::now()).unwrap();
        assert!(!map.is_empty());

        assert!(map.remove(&key("k1")).is_some());
        assert!(map.remove(&key("k1")).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_created_before() {
        let mut map = ContextMap::new();
        let now = Utc::now();
        map.put(key("old"), Arc::new(1), now - Duration::hours(2))
            .unwrap();
        map.put(key("new"), Arc::new(2), now).unwrap();

        let expired = map.created_before(now - Duration::hours(1));
        assert_eq!(expired, vec![key("old")]);
    }
}
