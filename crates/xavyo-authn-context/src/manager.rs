//! Session-scoped authentication context manager.
//!
//! The public surface used by redirect-based login flows:
//!
//! ```text
//! begin(session, ctx) -> key      absent  -> pending
//! rekey(session, key, alias)      pending -> pending (extra lookup path)
//! lookup(session, request)        pending -> pending, or None
//! end(session, request)           pending -> removed (resolved / cancelled)
//! ```
//!
//! Each session gets its own [`ContextRegistry`], created on the first
//! `begin` and stored under one session attribute. The registry removes
//! itself from the session once its last flow ends.

use crate::config::ContextConfig;
use crate::error::{ContextError, ContextResult};
use crate::key::CorrelationKey;
use crate::registry::ContextRegistry;
use crate::request::InboundRequest;
use crate::session::{Attribute, SessionAttributes};
use crate::strategy::KeyResolver;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::instrument;

/// Begins, resolves and ends in-flight authentication flows of a session.
pub struct AuthnContextManager<T> {
    config: ContextConfig,
    resolver: KeyResolver,
    _context: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for AuthnContextManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthnContextManager")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish()
    }
}

fn same_registry<T>(attribute: &Attribute, registry: &Arc<ContextRegistry<T>>) -> bool {
    Arc::as_ptr(attribute).cast::<()>() == Arc::as_ptr(registry).cast::<()>()
}

impl<T> AuthnContextManager<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Manager with the standard resolution order (client instance, query
    /// parameter, default key).
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        let resolver = KeyResolver::standard(config.query_param.clone());
        Self {
            config,
            resolver,
            _context: PhantomData,
        }
    }

    /// Replace the resolution chain.
    #[must_use]
    pub fn with_resolver(mut self, resolver: KeyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// `(name, value)` query pair to append to the outbound redirect.
    ///
    /// `None` for the default key, which the return leg resolves without
    /// any parameter.
    #[must_use]
    pub fn redirect_param<'a>(
        &'a self,
        key: &'a CorrelationKey,
    ) -> Option<(&'a str, &'a str)> {
        (!key.is_default()).then(|| (self.config.query_param.as_str(), key.as_str()))
    }

    /// Start a flow with a key from the configured allocation policy.
    ///
    /// # Errors
    ///
    /// [`ContextError::DuplicateKey`] if the allocated key is already taken
    /// by a different context, which with default-key allocation means a
    /// second flow was started while the first is still pending.
    ///
    /// Beginning again with a context equal to the pending one is not an
    /// error: with default-key allocation it returns the same key and the
    /// session still holds a single flow (a re-submitted login form).
    #[instrument(skip(self, session, context), fields(session_id = %session.id()))]
    pub fn begin(
        &self,
        session: &dyn SessionAttributes,
        context: T,
    ) -> ContextResult<CorrelationKey> {
        let key = self.config.allocation.allocate();
        self.begin_with_key(session, key.clone(), context)?;
        Ok(key)
    }

    /// Start a flow under a caller-chosen key.
    pub fn begin_with_key(
        &self,
        session: &dyn SessionAttributes,
        key: CorrelationKey,
        context: T,
    ) -> ContextResult<()> {
        let context = Arc::new(context);
        loop {
            let registry = self.registry_or_create(session);
            match registry.put(key.clone(), Arc::clone(&context)) {
                Ok(()) => {
                    tracing::debug!(
                        session_id = %session.id(),
                        key = %key.fingerprint(),
                        "Began authentication flow"
                    );
                    return Ok(());
                }
                // Lost a race with `end` emptying the registry; start over
                Err(ContextError::Detached) => self.detach(session, &registry),
                Err(err) => return Err(err),
            }
        }
    }

    /// Context of the flow the request belongs to, if any.
    ///
    /// A miss is expected (stale, replayed or expired redirects) and the
    /// caller should report it as "flow not found / expired".
    #[must_use]
    pub fn lookup(
        &self,
        session: &dyn SessionAttributes,
        request: &dyn InboundRequest,
    ) -> Option<Arc<T>> {
        if !Self::belongs_to(session, request) {
            return None;
        }
        let key = self.resolver.resolve(request);
        self.lookup_key(session, &key)
    }

    /// Context stored under `key` (original or alias), if any.
    #[must_use]
    pub fn lookup_key(
        &self,
        session: &dyn SessionAttributes,
        key: &CorrelationKey,
    ) -> Option<Arc<T>> {
        let registry = self.registry(session)?;
        let found = registry.get(key);
        if found.is_none() {
            // The lookup may have swept the last expired flow
            self.release_if_empty(session, &registry);
        }
        tracing::debug!(
            session_id = %session.id(),
            key = %key.fingerprint(),
            found = found.is_some(),
            "Authentication context lookup"
        );
        found
    }

    /// Make `new_key` an additional lookup path for the flow under
    /// `existing`.
    ///
    /// # Errors
    ///
    /// - [`ContextError::NoSuchContext`] if `existing` names nothing. This
    ///   is a benign race and may be ignored.
    /// - [`ContextError::DuplicateKey`] if `new_key` names another context.
    /// - [`ContextError::AliasingDisabled`] if the registry has no aliasing.
    pub fn rekey(
        &self,
        session: &dyn SessionAttributes,
        existing: &CorrelationKey,
        new_key: CorrelationKey,
    ) -> ContextResult<()> {
        let Some(registry) = self.registry(session) else {
            tracing::debug!(
                session_id = %session.id(),
                key = %existing.fingerprint(),
                "No authentication flows in session, nothing to re-key"
            );
            return Err(ContextError::NoSuchContext(existing.clone()));
        };
        let result = registry.rekey_alias(existing, new_key);
        if let Err(ContextError::NoSuchContext(_)) = &result {
            tracing::debug!(
                session_id = %session.id(),
                key = %existing.fingerprint(),
                "Re-key of unknown authentication flow"
            );
            self.release_if_empty(session, &registry);
        }
        result
    }

    /// Link the flow under `existing` to a (new) UI instance of the session.
    ///
    /// Returns the client-instance key that now resolves to the flow.
    pub fn adopt_client_instance(
        &self,
        session: &dyn SessionAttributes,
        existing: &CorrelationKey,
        instance_id: &str,
    ) -> ContextResult<CorrelationKey> {
        let alias = CorrelationKey::for_client_instance(instance_id, session.id());
        self.rekey(session, existing, alias.clone())?;
        Ok(alias)
    }

    /// End the flow the request belongs to, removing all of its keys.
    ///
    /// Idempotent: returns `false` when there was nothing to remove, or
    /// when the request belongs to another session.
    #[instrument(skip(self, session, request), fields(session_id = %session.id()))]
    pub fn end(&self, session: &dyn SessionAttributes, request: &dyn InboundRequest) -> bool {
        if !Self::belongs_to(session, request) {
            return false;
        }
        let key = self.resolver.resolve(request);
        self.end_key(session, &key)
    }

    /// End the flow `key` (original or alias) belongs to.
    pub fn end_key(&self, session: &dyn SessionAttributes, key: &CorrelationKey) -> bool {
        let Some(registry) = self.registry(session) else {
            tracing::debug!(
                session_id = %session.id(),
                key = %key.fingerprint(),
                "No authentication flows in session, nothing to end"
            );
            return false;
        };
        let removed = registry.remove_flow(key);
        if removed {
            tracing::info!(
                session_id = %session.id(),
                key = %key.fingerprint(),
                "Ended authentication flow"
            );
        } else {
            tracing::debug!(
                session_id = %session.id(),
                key = %key.fingerprint(),
                "Authentication flow already ended"
            );
        }
        self.release_if_empty(session, &registry);
        removed
    }

    /// Whether the session has any flow in progress.
    #[must_use]
    pub fn in_progress(&self, session: &dyn SessionAttributes) -> bool {
        self.flow_count(session) > 0
    }

    /// Number of flows in progress in the session, after any due expiry
    /// sweep.
    #[must_use]
    pub fn flow_count(&self, session: &dyn SessionAttributes) -> usize {
        let Some(registry) = self.registry(session) else {
            return 0;
        };
        registry.sweep_if_due();
        let count = registry.len();
        if count == 0 {
            self.release_if_empty(session, &registry);
        }
        count
    }

    /// Abort every flow of the session. Returns how many were removed.
    pub fn cancel_all(&self, session: &dyn SessionAttributes) -> usize {
        let Some(registry) = self.registry(session) else {
            return 0;
        };
        let removed = registry.clear();
        self.release_if_empty(session, &registry);
        if removed > 0 {
            tracing::info!(
                session_id = %session.id(),
                removed = removed,
                "Cancelled all authentication flows"
            );
        }
        removed
    }

    fn belongs_to(session: &dyn SessionAttributes, request: &dyn InboundRequest) -> bool {
        let belongs = request.session_id() == session.id();
        if !belongs {
            tracing::warn!(
                session_id = %session.id(),
                request_session_id = %request.session_id(),
                "Request does not belong to the given session"
            );
        }
        belongs
    }

    fn release_if_empty(
        &self,
        session: &dyn SessionAttributes,
        registry: &Arc<ContextRegistry<T>>,
    ) {
        if registry.detach_if_empty() {
            self.detach(session, registry);
        }
    }

    fn registry(&self, session: &dyn SessionAttributes) -> Option<Arc<ContextRegistry<T>>> {
        let attribute = session.get_attribute(&self.config.attribute_name)?;
        match attribute.downcast::<ContextRegistry<T>>() {
            Ok(registry) => Some(registry),
            Err(_) => {
                tracing::warn!(
                    session_id = %session.id(),
                    attribute = %self.config.attribute_name,
                    "Session attribute holds an unexpected type"
                );
                None
            }
        }
    }

    fn registry_or_create(&self, session: &dyn SessionAttributes) -> Arc<ContextRegistry<T>> {
        let registry_config = self.config.registry;
        loop {
            let attribute = session.get_or_insert_attribute(&self.config.attribute_name, &|| {
                let fresh: Attribute = Arc::new(ContextRegistry::<T>::new(registry_config));
                fresh
            });
            match Arc::clone(&attribute).downcast::<ContextRegistry<T>>() {
                Ok(registry) => return registry,
                Err(_) => {
                    tracing::warn!(
                        session_id = %session.id(),
                        attribute = %self.config.attribute_name,
                        "Replacing session attribute of unexpected type"
                    );
                    session.remove_attribute_if(&self.config.attribute_name, &|current| {
                        Arc::ptr_eq(current, &attribute)
                    });
                }
            }
        }
    }

    fn detach(&self, session: &dyn SessionAttributes, registry: &Arc<ContextRegistry<T>>) {
        let removed = session.remove_attribute_if(&self.config.attribute_name, &|current| {
            same_registry(current, registry)
        });
        if removed {
            tracing::info!(
                session_id = %session.id(),
                "Detached empty authentication context registry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegistryConfig, TtlPolicy};
    use crate::key::KeyAllocation;
    use crate::request::RequestDescriptor;
    use crate::session::InMemorySession;

    fn manager(allocation: KeyAllocation) -> AuthnContextManager<String> {
        AuthnContextManager::new(ContextConfig {
            allocation,
            ..ContextConfig::default()
        })
    }

    #[test]
    fn test_begin_lookup_end() {
        let manager = manager(KeyAllocation::Random);
        let session = InMemorySession::with_id("sessionX");

        let key = manager.begin(&session, "idp=foo".to_string()).unwrap();
        let request = RequestDescriptor::new("sessionX").with_query_param("signInId", key.as_str());
        assert_eq!(manager.lookup(&session, &request).as_deref(), Some(&"idp=foo".to_string()));

        assert!(manager.end(&session, &request));
        assert!(manager.lookup(&session, &request).is_none());
        assert!(!manager.end(&session, &request));
    }

    #[test]
    fn test_registry_created_lazily_and_detached_when_empty() {
        let manager = manager(KeyAllocation::Random);
        let session = InMemorySession::new();
        assert_eq!(session.attribute_count(), 0);
        assert!(!manager.in_progress(&session));

        let key = manager.begin(&session, "a".to_string()).unwrap();
        assert_eq!(session.attribute_count(), 1);
        assert!(manager.in_progress(&session));

        manager.end_key(&session, &key);
        assert_eq!(session.attribute_count(), 0);
        assert!(!manager.in_progress(&session));
    }

    #[test]
    fn test_begin_after_detach_creates_new_registry() {
        let manager = manager(KeyAllocation::Default);
        let session = InMemorySession::new();

        let key = manager.begin(&session, "first".to_string()).unwrap();
        manager.end_key(&session, &key);

        let key = manager.begin(&session, "second".to_string()).unwrap();
        assert_eq!(
            manager.lookup_key(&session, &key).as_deref(),
            Some(&"second".to_string())
        );
    }

    #[test]
    fn test_redirect_param() {
        let manager = manager(KeyAllocation::Random);
        let key = CorrelationKey::from("K");
        assert_eq!(manager.redirect_param(&key), Some(("signInId", "K")));
        assert_eq!(manager.redirect_param(&CorrelationKey::default_key()), None);
    }

    #[test]
    fn test_lookup_rejects_foreign_request() {
        let manager = manager(KeyAllocation::Default);
        let session = InMemorySession::with_id("a");
        manager.begin(&session, "ctx".to_string()).unwrap();

        let request = RequestDescriptor::new("b");
        assert!(manager.lookup(&session, &request).is_none());
        assert!(manager.lookup(&session, &RequestDescriptor::new("a")).is_some());
    }

    #[test]
    fn test_end_rejects_foreign_request() {
        let manager = manager(KeyAllocation::Random);
        let session = InMemorySession::with_id("a");
        let key = manager.begin(&session, "ctx".to_string()).unwrap();

        let foreign = RequestDescriptor::new("b").with_query_param("signInId", key.as_str());
        assert!(!manager.end(&session, &foreign));
        assert!(manager.lookup_key(&session, &key).is_some());

        let own = RequestDescriptor::new("a").with_query_param("signInId", key.as_str());
        assert!(manager.end(&session, &own));
    }

    #[test]
    fn test_expired_registry_leaves_session() {
        let manager: AuthnContextManager<String> = AuthnContextManager::new(ContextConfig {
            registry: RegistryConfig::multi_flow().with_ttl(TtlPolicy::new(
                chrono::Duration::milliseconds(1),
                chrono::Duration::zero(),
            )),
            ..ContextConfig::default()
        });
        let session = InMemorySession::new();

        let key = manager.begin(&session, "ctx".to_string()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert!(manager.lookup_key(&session, &key).is_none());
        assert_eq!(session.attribute_count(), 0);
        assert!(!manager.in_progress(&session));

        // A new flow starts on a fresh registry
        let key = manager.begin(&session, "next".to_string()).unwrap();
        assert_eq!(session.attribute_count(), 1);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(manager.flow_count(&session), 0);
        assert_eq!(session.attribute_count(), 0);
        assert!(matches!(
            manager.rekey(&session, &key, CorrelationKey::from("x")),
            Err(ContextError::NoSuchContext(_))
        ));
    }

    #[test]
    fn test_rekey_without_registry() {
        let manager = manager(KeyAllocation::Default);
        let session = InMemorySession::new();
        let result = manager.rekey(
            &session,
            &CorrelationKey::default_key(),
            CorrelationKey::from("x"),
        );
        assert!(matches!(result, Err(ContextError::NoSuchContext(_))));
    }

    #[test]
    fn test_adopt_client_instance() {
        let manager = manager(KeyAllocation::Default);
        let session = InMemorySession::with_id("sessionX");
        let key = manager.begin(&session, "ctx".to_string()).unwrap();

        let alias = manager.adopt_client_instance(&session, &key, "77").unwrap();
        assert_eq!(alias.as_str(), "77@sessionX");
        let request = RequestDescriptor::new("sessionX").with_client_instance("77");
        assert!(manager.lookup(&session, &request).is_some());
    }

    #[test]
    fn test_cancel_all() {
        let manager = manager(KeyAllocation::Random);
        let session = InMemorySession::new();
        manager.begin(&session, "a".to_string()).unwrap();
        manager.begin(&session, "b".to_string()).unwrap();
        assert_eq!(manager.flow_count(&session), 2);

        assert_eq!(manager.cancel_all(&session), 2);
        assert_eq!(manager.flow_count(&session), 0);
        assert_eq!(session.attribute_count(), 0);
        assert_eq!(manager.cancel_all(&session), 0);
    }

    #[test]
    fn test_foreign_attribute_is_replaced() {
        let manager = manager(KeyAllocation::Default);
        let session = InMemorySession::new();
        session.set_attribute(&manager.config().attribute_name, Arc::new(7u32));

        assert!(!manager.in_progress(&session));
        let key = manager.begin(&session, "ctx".to_string()).unwrap();
        assert!(manager.lookup_key(&session, &key).is_some());
    }

    #[test]
    fn test_aliasing_disabled_by_config() {
        let manager: AuthnContextManager<String> = AuthnContextManager::new(ContextConfig {
            allocation: KeyAllocation::Default,
            registry: RegistryConfig::single_flow(),
            ..ContextConfig::default()
        });
        let session = InMemorySession::new();
        let key = manager.begin(&session, "ctx".to_string()).unwrap();
        let result = manager.rekey(&session, &key, CorrelationKey::from("x"));
        assert!(matches!(result, Err(ContextError::AliasingDisabled(_))));
    }
}
