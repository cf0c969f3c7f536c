//! Error types for the authentication context store.
//!
//! Only [`ContextError::DuplicateKey`] is meant to fail the enclosing
//! request. [`ContextError::NoSuchContext`] is a benign race (two redirects
//! for the same flow arriving together) and callers are free to ignore it.
//! A lookup miss is never an error: it is `None`.

use crate::key::CorrelationKey;
use thiserror::Error;

/// Errors raised by context registries and the context manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The key already names a different context.
    ///
    /// This signals a key-allocation bug, e.g. two flows of the same session
    /// colliding on the default key.
    #[error("Correlation key {} already bound to a different context", .0.fingerprint())]
    DuplicateKey(CorrelationKey),

    /// The key does not name any in-flight context.
    #[error("No authentication context for correlation key {}", .0.fingerprint())]
    NoSuchContext(CorrelationKey),

    /// Re-keying was requested on a registry configured without aliasing.
    #[error("Aliasing is disabled for this registry (key {})", .0.fingerprint())]
    AliasingDisabled(CorrelationKey),

    /// The registry was detached from its session by a concurrent `end`.
    ///
    /// [`AuthnContextManager`](crate::AuthnContextManager) retries on a
    /// fresh registry, so callers of the manager never observe this.
    #[error("Context registry was detached from its session")]
    Detached,
}

impl ContextError {
    /// Whether this error indicates corrupted invariants that must fail the
    /// enclosing request.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateKey(_) | Self::AliasingDisabled(_))
    }
}

/// Result type for context store operations.
pub type ContextResult<T> = Result<T, ContextError>;
