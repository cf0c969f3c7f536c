//! Ready-made context payload for redirect-based logins.
//!
//! The store itself is generic and never looks inside its payload; this type
//! covers what SAML/OIDC/sandbox call sites typically need to carry across
//! the redirect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What started the login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthnTrigger {
    /// Regular end-user login.
    #[default]
    Regular,
    /// Sandbox (test) login started from the admin console; the result is
    /// reported to a diagnostic callback instead of creating a session.
    Sandbox,
}

/// State of one redirect-based login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectedFlowState {
    /// Configuration key of the chosen identity provider.
    pub idp_key: String,
    /// Where to send the user once the flow completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    pub trigger: AuthnTrigger,
    /// Protocol-specific remote login metadata (e.g. a SAML request id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_login: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl RedirectedFlowState {
    #[must_use]
    pub fn new(idp_key: impl Into<String>) -> Self {
        Self {
            idp_key: idp_key.into(),
            return_url: None,
            trigger: AuthnTrigger::Regular,
            remote_login: None,
            started_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_return_url(mut self, return_url: impl Into<String>) -> Self {
        self.return_url = Some(return_url.into());
        self
    }

    #[must_use]
    pub fn with_remote_login(mut self, remote_login: impl Into<String>) -> Self {
        self.remote_login = Some(remote_login.into());
        self
    }

    #[must_use]
    pub fn sandboxed(mut self) -> Self {
        self.trigger = AuthnTrigger::Sandbox;
        self
    }

    #[must_use]
    pub fn is_sandbox(&self) -> bool {
        self.trigger == AuthnTrigger::Sandbox
    }
}
