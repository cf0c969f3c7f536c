//! Session attribute store abstraction.
//!
//! The host web layer owns sessions; the context manager only needs one
//! named attribute slot per session to hold its registry.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Type-erased session attribute value.
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// Named attribute slots of one user session.
///
/// The two provided helpers are not atomic in their default form. Hosts
/// whose sessions are shared between concurrent requests (several browser
/// tabs) should override them with an atomic version, as
/// [`InMemorySession`] does.
pub trait SessionAttributes: Send + Sync {
    /// Identifier of this session.
    fn id(&self) -> &str;

    fn get_attribute(&self, name: &str) -> Option<Attribute>;

    fn set_attribute(&self, name: &str, value: Attribute);

    fn remove_attribute(&self, name: &str);

    /// Return the attribute, storing `init()` first if absent.
    fn get_or_insert_attribute(&self, name: &str, init: &dyn Fn() -> Attribute) -> Attribute {
        if let Some(existing) = self.get_attribute(name) {
            return existing;
        }
        let value = init();
        self.set_attribute(name, Arc::clone(&value));
        value
    }

    /// Remove the attribute only if `predicate` accepts its current value.
    ///
    /// Returns `true` if it was removed.
    fn remove_attribute_if(&self, name: &str, predicate: &dyn Fn(&Attribute) -> bool) -> bool {
        match self.get_attribute(name) {
            Some(current) if predicate(&current) => {
                self.remove_attribute(name);
                true
            }
            _ => false,
        }
    }
}

/// In-memory session, for tests and for hosts without their own session
/// store.
#[derive(Default)]
pub struct InMemorySession {
    id: String,
    attributes: RwLock<HashMap<String, Attribute>>,
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySession")
            .field("id", &self.id)
            .field("attributes", &self.attributes.read().len())
            .finish()
    }
}

impl InMemorySession {
    /// A session with a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    /// Number of attributes currently set.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.read().len()
    }
}

impl SessionAttributes for InMemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_attribute(&self, name: &str) -> Option<Attribute> {
        self.attributes.read().get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: Attribute) {
        self.attributes.write().insert(name.to_string(), value);
    }

    fn remove_attribute(&self, name: &str) {
        self.attributes.write().remove(name);
    }

    fn get_or_insert_attribute(&self, name: &str, init: &dyn Fn() -> Attribute) -> Attribute {
        let mut attributes = self.attributes.write();
        Arc::clone(attributes.entry(name.to_string()).or_insert_with(init))
    }

    fn remove_attribute_if(&self, name: &str, predicate: &dyn Fn(&Attribute) -> bool) -> bool {
        let mut attributes = self.attributes.write();
        match attributes.get(name) {
            Some(current) if predicate(current) => {
                attributes.remove(name);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let session = InMemorySession::with_id("s1");
        assert_eq!(session.id(), "s1");
        assert!(session.get_attribute("a").is_none());

        session.set_attribute("a", Arc::new(42u32));
        let value = session.get_attribute("a").unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&42));

        session.remove_attribute("a");
        assert!(session.get_attribute("a").is_none());
        assert_eq!(session.attribute_count(), 0);
    }

    #[test]
    fn test_get_or_insert_keeps_existing() {
        let session = InMemorySession::new();
        let first = session.get_or_insert_attribute("a", &|| Arc::new(1u32));
        let second = session.get_or_insert_attribute("a", &|| Arc::new(2u32));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.downcast_ref::<u32>(), Some(&1));
    }

    #[test]
    fn test_remove_attribute_if() {
        let session = InMemorySession::new();
        let stored: Attribute = Arc::new(1u32);
        session.set_attribute("a", Arc::clone(&stored));

        let other: Attribute = Arc::new(1u32);
        assert!(!session.remove_attribute_if("a", &|current| Arc::ptr_eq(current, &other)));
        assert!(session.get_attribute("a").is_some());

        assert!(session.remove_attribute_if("a", &|current| Arc::ptr_eq(current, &stored)));
        assert!(session.get_attribute("a").is_none());
        assert!(!session.remove_attribute_if("a", &|_| true));
    }

    #[test]
    fn test_random_session_ids_differ() {
        assert_ne!(InMemorySession::new().id(), InMemorySession::new().id());
    }
}
