//! Correlation key resolution from inbound requests.
//!
//! Each strategy derives a key from one request shape. A [`KeyResolver`]
//! chains them: the first strategy that yields a key wins, and the
//! resolved key is used as-is even if it then misses in the registry.
//!
//! Known limitation: an external redirect that comes back without a key
//! resolves to the default key. With several flows outstanding in one
//! session this can name the wrong flow (or none). Call sites that allow
//! concurrent flows must always embed an explicit key.

use crate::key::CorrelationKey;
use crate::request::InboundRequest;

/// Derives a correlation key from an inbound request.
pub trait KeyResolutionStrategy: Send + Sync {
    /// The key to use, or `None` if this strategy does not apply.
    fn resolve(&self, request: &dyn InboundRequest) -> Option<CorrelationKey>;
}

/// Reads the key from a query parameter, falling back to the default key.
///
/// Used on plain redirect landing endpoints (SAML/OAuth response consumers)
/// invoked outside any live UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameterStrategy {
    param_name: String,
}

impl QueryParameterStrategy {
    #[must_use]
    pub fn new(param_name: impl Into<String>) -> Self {
        Self {
            param_name: param_name.into(),
        }
    }

    #[must_use]
    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    /// The explicit key carried by the request, without default fallback.
    #[must_use]
    pub fn explicit_key(&self, request: &dyn InboundRequest) -> Option<CorrelationKey> {
        request.query_param(&self.param_name).map(CorrelationKey::from)
    }
}

impl KeyResolutionStrategy for QueryParameterStrategy {
    fn resolve(&self, request: &dyn InboundRequest) -> Option<CorrelationKey> {
        Some(
            self.explicit_key(request)
                .unwrap_or_else(CorrelationKey::default_key),
        )
    }
}

/// Combines the client instance id with the session id.
///
/// Skipped when the request carries no instance id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientInstanceStrategy;

impl KeyResolutionStrategy for ClientInstanceStrategy {
    fn resolve(&self, request: &dyn InboundRequest) -> Option<CorrelationKey> {
        request
            .client_instance_id()
            .map(|instance| CorrelationKey::for_client_instance(instance, request.session_id()))
    }
}

/// Always the default key. Last resort for single-flow call sites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultKeyStrategy;

impl KeyResolutionStrategy for DefaultKeyStrategy {
    fn resolve(&self, _request: &dyn InboundRequest) -> Option<CorrelationKey> {
        Some(CorrelationKey::default_key())
    }
}

/// Ordered chain of strategies.
pub struct KeyResolver {
    strategies: Vec<Box<dyn KeyResolutionStrategy>>,
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

impl KeyResolver {
    /// Client instance, then query parameter, then default key.
    #[must_use]
    pub fn standard(param_name: impl Into<String>) -> Self {
        Self::new()
            .with(ClientInstanceStrategy)
            .with(QueryParameterStrategy::new(param_name))
            .with(DefaultKeyStrategy)
    }

    /// Query parameter only (with its default-key fallback).
    #[must_use]
    pub fn redirect_only(param_name: impl Into<String>) -> Self {
        Self::new().with(QueryParameterStrategy::new(param_name))
    }

    /// An empty chain; resolves everything to the default key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Append a strategy to the end of the chain.
    #[must_use]
    pub fn with(mut self, strategy: impl KeyResolutionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Key from the first applicable strategy, else the default key.
    #[must_use]
    pub fn resolve(&self, request: &dyn InboundRequest) -> CorrelationKey {
        self.strategies
            .iter()
            .find_map(|strategy| strategy.resolve(request))
            .unwrap_or_else(CorrelationKey::default_key)
    }
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::new()
    }
}
