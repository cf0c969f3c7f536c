//! Authentication context correlation store for xavyo
//!
//! Keeps the state of in-flight external authentication flows (SAML, OIDC,
//! sandbox logins) between the outbound redirect and the inbound callback:
//! - Per-session registry of contexts keyed by correlation keys
//! - Default, random and client-instance correlation keys
//! - Aliases (re-keying) for UIs that reconnect under a new instance id
//! - Optional TTL expiry with lazy, interval-bounded sweeps
//! - Process-wide TTL store for callbacks that arrive without the session

pub mod config;
pub mod error;
pub mod key;
pub mod manager;
pub mod map;
pub mod registry;
pub mod rekey;
pub mod request;
pub mod session;
pub mod shared;
pub mod state;
pub mod strategy;

pub use config::{ConfigError, ContextConfig, RegistryConfig, TtlPolicy};
pub use error::{ContextError, ContextResult};
pub use key::{CorrelationKey, KeyAllocation};
pub use manager::AuthnContextManager;
pub use map::{ContextEntry, ContextMap, PutOutcome};
pub use registry::ContextRegistry;
pub use rekey::ReKeyIndex;
pub use request::{InboundRequest, RequestDescriptor};
pub use session::{Attribute, InMemorySession, SessionAttributes};
pub use shared::SharedContextStore;
pub use state::{AuthnTrigger, RedirectedFlowState};
pub use strategy::{
    ClientInstanceStrategy, DefaultKeyStrategy, KeyResolutionStrategy, KeyResolver,
    QueryParameterStrategy,
};
