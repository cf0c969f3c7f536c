//! Process-wide context store for flows that cannot rely on the session.
//!
//! Some redirect flows come back on a request that does not carry the
//! originating session (cross-site POST bindings, cookie-less callbacks).
//! Their context lives in one store shared by the whole process, passed
//! around explicitly by the host. Entries always expire; there is no
//! default-key fallback since a shared default key would cross sessions.

use crate::config::{RegistryConfig, TtlPolicy};
use crate::error::ContextResult;
use crate::key::CorrelationKey;
use crate::registry::ContextRegistry;
use crate::request::InboundRequest;
use crate::strategy::QueryParameterStrategy;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Time-bounded store shared across sessions.
#[derive(Debug)]
pub struct SharedContextStore<T> {
    registry: ContextRegistry<T>,
    param: QueryParameterStrategy,
}

impl<T: PartialEq> SharedContextStore<T> {
    #[must_use]
    pub fn new(ttl: TtlPolicy, query_param: impl Into<String>) -> Self {
        let config = RegistryConfig::multi_flow()
            .with_aliasing(false)
            .with_ttl(ttl);
        Self {
            registry: ContextRegistry::new(config),
            param: QueryParameterStrategy::new(query_param),
        }
    }

    /// Maximum age of an entry.
    #[must_use]
    pub fn max_ttl(&self) -> chrono::Duration {
        self.registry
            .config()
            .ttl
            .map_or_else(|| TtlPolicy::default().max_ttl, |ttl| ttl.max_ttl)
    }

    #[must_use]
    pub fn query_param(&self) -> &str {
        self.param.param_name()
    }

    /// Store `context` under a fresh random key.
    pub fn begin(&self, context: T) -> ContextResult<CorrelationKey> {
        self.begin_at(context, Utc::now())
    }

    pub fn begin_at(&self, context: T, now: DateTime<Utc>) -> ContextResult<CorrelationKey> {
        let key = CorrelationKey::random();
        self.registry.put_at(key.clone(), Arc::new(context), now)?;
        tracing::debug!(key = %key.fingerprint(), "Stored shared authentication context");
        Ok(key)
    }

    /// Context named by the request's query parameter.
    ///
    /// Requests without the parameter never match.
    #[must_use]
    pub fn lookup(&self, request: &dyn InboundRequest) -> Option<Arc<T>> {
        let key = self.param.explicit_key(request)?;
        self.get(&key)
    }

    #[must_use]
    pub fn get(&self, key: &CorrelationKey) -> Option<Arc<T>> {
        self.registry.get(key)
    }

    #[must_use]
    pub fn get_at(&self, key: &CorrelationKey, now: DateTime<Utc>) -> Option<Arc<T>> {
        self.registry.get_at(key, now)
    }

    /// Remove the entry under `key`. Idempotent.
    pub fn end(&self, key: &CorrelationKey) -> bool {
        let removed = self.registry.remove_flow(key);
        if removed {
            tracing::debug!(key = %key.fingerprint(), "Removed shared authentication context");
        }
        removed
    }

    /// Remove every expired entry now, regardless of the cleanup interval.
    pub fn sweep_expired(&self) -> usize {
        self.registry.sweep_expired()
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        self.registry.sweep_expired_at(now)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}
