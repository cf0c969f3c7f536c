//! Common test utilities for xavyo-authn-context integration tests.

use std::sync::Once;
use xavyo_authn_context::{
    AuthnContextManager, ContextConfig, KeyAllocation, RedirectedFlowState, RegistryConfig,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once). Set `RUST_LOG` to see output.
#[allow(dead_code)]
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Manager for several concurrent flows per session (random keys, aliasing).
#[allow(dead_code)]
pub fn multi_flow_manager() -> AuthnContextManager<RedirectedFlowState> {
    init_test_logging();
    AuthnContextManager::new(ContextConfig::default())
}

/// Manager for one flow per session under the default key.
#[allow(dead_code)]
pub fn default_key_manager() -> AuthnContextManager<RedirectedFlowState> {
    init_test_logging();
    AuthnContextManager::new(ContextConfig {
        allocation: KeyAllocation::Default,
        registry: RegistryConfig::multi_flow(),
        ..ContextConfig::default()
    })
}

#[allow(dead_code)]
pub fn flow(idp: &str) -> RedirectedFlowState {
    RedirectedFlowState::new(idp).with_return_url("https://app.example.com/home")
}
