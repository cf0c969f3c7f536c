//! Configuration for context registries and the context manager.

use crate::key::KeyAllocation;
use chrono::Duration;

/// Default maximum age of an in-flight context (8 hours).
pub const DEFAULT_MAX_TTL_SECS: i64 = 8 * 3600;

/// Default minimum time between two expiry sweeps (1 hour).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: i64 = 3600;

/// Upper bound accepted for configured TTL and cleanup interval (1 year).
pub const MAX_CONFIGURED_SECS: i64 = 366 * 24 * 3600;

/// Default session attribute slot holding the registry.
pub const DEFAULT_ATTRIBUTE_NAME: &str = "xavyo.authn.contexts";

/// Default query parameter carrying the correlation key in redirects.
pub const DEFAULT_QUERY_PARAM: &str = "signInId";

/// Time-based expiry of contexts.
///
/// Expiry is lazy: a sweep runs when the registry is touched and at least
/// `cleanup_interval` has passed since the previous one. Entries may
/// therefore outlive `max_ttl` by up to one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Maximum age of a context.
    pub max_ttl: Duration,
    /// Minimum time between two sweeps.
    pub cleanup_interval: Duration,
}

impl TtlPolicy {
    #[must_use]
    pub fn new(max_ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            max_ttl,
            cleanup_interval,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            max_ttl: Duration::seconds(DEFAULT_MAX_TTL_SECS),
            cleanup_interval: Duration::seconds(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

/// Behaviour of a single [`ContextRegistry`](crate::ContextRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Whether additional keys may be linked to an existing context.
    pub aliasing: bool,
    /// Expiry policy; `None` disables expiry entirely.
    pub ttl: Option<TtlPolicy>,
}

impl RegistryConfig {
    /// Several concurrent, aliasable flows; cleanup relies on explicit `end`.
    #[must_use]
    pub fn multi_flow() -> Self {
        Self {
            aliasing: true,
            ttl: None,
        }
    }

    /// One flow at a time, expired by TTL.
    #[must_use]
    pub fn single_flow() -> Self {
        Self {
            aliasing: false,
            ttl: Some(TtlPolicy::default()),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_aliasing(mut self, aliasing: bool) -> Self {
        self.aliasing = aliasing;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::multi_flow()
    }
}

/// Configuration of an [`AuthnContextManager`](crate::AuthnContextManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Session attribute slot holding the per-session registry.
    pub attribute_name: String,
    /// Query parameter carrying the correlation key.
    pub query_param: String,
    /// How `begin` allocates keys.
    pub allocation: KeyAllocation,
    /// Behaviour of each per-session registry.
    pub registry: RegistryConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            attribute_name: DEFAULT_ATTRIBUTE_NAME.to_string(),
            query_param: DEFAULT_QUERY_PARAM.to_string(),
            allocation: KeyAllocation::Random,
            registry: RegistryConfig::multi_flow(),
        }
    }
}

impl ContextConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let attribute_name = reader("AUTHN_CONTEXT_ATTRIBUTE")
            .unwrap_or_else(|_| DEFAULT_ATTRIBUTE_NAME.to_string());
        if attribute_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "AUTHN_CONTEXT_ATTRIBUTE".into(),
                "must not be empty".into(),
            ));
        }

        let query_param = reader("AUTHN_CONTEXT_QUERY_PARAM")
            .unwrap_or_else(|_| DEFAULT_QUERY_PARAM.to_string());
        if query_param.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "AUTHN_CONTEXT_QUERY_PARAM".into(),
                "must not be empty".into(),
            ));
        }

        let allocation = reader("AUTHN_CONTEXT_KEY_ALLOCATION")
            .unwrap_or_else(|_| "random".to_string())
            .parse::<KeyAllocation>()
            .map_err(|e| ConfigError::InvalidValue("AUTHN_CONTEXT_KEY_ALLOCATION".into(), e))?;

        let aliasing = reader("AUTHN_CONTEXT_ALIASING")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .map_err(|e| ConfigError::InvalidValue("AUTHN_CONTEXT_ALIASING".into(), e.to_string()))?;

        let max_ttl_secs = match reader("AUTHN_CONTEXT_MAX_TTL_SECS") {
            Ok(raw) => raw.parse::<i64>().map_err(|e| {
                ConfigError::InvalidValue("AUTHN_CONTEXT_MAX_TTL_SECS".into(), e.to_string())
            })?,
            Err(_) => 0,
        };
        let max_ttl = bounded_seconds("AUTHN_CONTEXT_MAX_TTL_SECS", max_ttl_secs.max(0))?;

        let cleanup_interval_secs = reader("AUTHN_CONTEXT_CLEANUP_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_CLEANUP_INTERVAL_SECS.to_string())
            .parse::<i64>()
            .map_err(|e| {
                ConfigError::InvalidValue(
                    "AUTHN_CONTEXT_CLEANUP_INTERVAL_SECS".into(),
                    e.to_string(),
                )
            })?;
        if cleanup_interval_secs < 0 {
            return Err(ConfigError::InvalidValue(
                "AUTHN_CONTEXT_CLEANUP_INTERVAL_SECS".into(),
                "must not be negative".into(),
            ));
        }
        let cleanup_interval =
            bounded_seconds("AUTHN_CONTEXT_CLEANUP_INTERVAL_SECS", cleanup_interval_secs)?;

        let ttl = (max_ttl_secs > 0).then(|| TtlPolicy::new(max_ttl, cleanup_interval));

        Ok(Self {
            attribute_name,
            query_param,
            allocation,
            registry: RegistryConfig { aliasing, ttl },
        })
    }
}

fn bounded_seconds(var: &str, secs: i64) -> Result<Duration, ConfigError> {
    if secs > MAX_CONFIGURED_SECS {
        return Err(ConfigError::InvalidValue(
            var.into(),
            format!("must not exceed {MAX_CONFIGURED_SECS} seconds"),
        ));
    }
    Duration::try_seconds(secs)
        .ok_or_else(|| ConfigError::InvalidValue(var.into(), "out of range".into()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
