//! Inbound request descriptor.
//!
//! The HTTP/UI layer in front of the store adapts whatever request object it
//! has into this narrow view: a session id, optional query parameters and an
//! optional client (UI) instance id. Nothing is read from ambient
//! thread-local or framework state.

use std::collections::HashMap;

/// What the store needs to know about an inbound request.
pub trait InboundRequest {
    /// Stable identifier of the session the request belongs to.
    fn session_id(&self) -> &str;

    /// Value of a query parameter, if present.
    fn query_param(&self, name: &str) -> Option<&str>;

    /// Id of the live UI instance issuing the request, if any.
    fn client_instance_id(&self) -> Option<&str>;
}

/// Owned [`InboundRequest`] built by the surrounding layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    session_id: String,
    query: HashMap<String, String>,
    client_instance_id: Option<String>,
}

impl RequestDescriptor {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Add a query parameter. Empty values are treated as absent.
    #[must_use]
    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.query.insert(name.into(), value);
        }
        self
    }

    /// Set the client instance id. Empty values are treated as absent.
    #[must_use]
    pub fn with_client_instance(mut self, instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        self.client_instance_id = (!instance_id.is_empty()).then_some(instance_id);
        self
    }
}

impl InboundRequest for RequestDescriptor {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    fn client_instance_id(&self) -> Option<&str> {
        self.client_instance_id.as_deref()
    }
}
