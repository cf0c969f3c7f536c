//! Secondary index of alias keys ("re-keying").
//!
//! Records, per original key, the additional keys later associated with the
//! same context. Aliases always hang off the root original; an alias of an
//! alias is recorded against the root.

use crate::key::CorrelationKey;
use std::collections::HashMap;

/// Original key -> aliases, plus the reverse direction.
#[derive(Debug, Default)]
pub struct ReKeyIndex {
    aliases: HashMap<CorrelationKey, Vec<CorrelationKey>>,
    originals: HashMap<CorrelationKey, CorrelationKey>,
}

impl ReKeyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `alias` as an additional key for `original`.
    ///
    /// The caller resolves `original` to a root key first. Linking the same
    /// alias twice is a no-op.
    pub fn link(&mut self, original: &CorrelationKey, alias: CorrelationKey) {
        if self.originals.contains_key(&alias) {
            return;
        }
        self.originals.insert(alias.clone(), original.clone());
        self.aliases.entry(original.clone()).or_default().push(alias);
    }

    /// The original key an alias was derived from.
    #[must_use]
    pub fn original_of(&self, alias: &CorrelationKey) -> Option<&CorrelationKey> {
        self.originals.get(alias)
    }

    /// Whether `key` is a recorded alias.
    #[must_use]
    pub fn is_alias(&self, key: &CorrelationKey) -> bool {
        self.originals.contains_key(key)
    }

    /// Aliases of `original`, in the order they were linked.
    #[must_use]
    pub fn aliases_of(&self, original: &CorrelationKey) -> &[CorrelationKey] {
        self.aliases.get(original).map_or(&[][..], Vec::as_slice)
    }

    /// Forget a single alias. The original and its other aliases stay.
    ///
    /// Returns `true` if `alias` was recorded.
    pub fn detach_alias(&mut self, alias: &CorrelationKey) -> bool {
        let Some(original) = self.originals.remove(alias) else {
            return false;
        };
        if let Some(list) = self.aliases.get_mut(&original) {
            list.retain(|k| k != alias);
            if list.is_empty() {
                self.aliases.remove(&original);
            }
        }
        true
    }

    /// Forget `original` and return every alias derived from it.
    pub fn take_aliases(&mut self, original: &CorrelationKey) -> Vec<CorrelationKey> {
        let aliases = self.aliases.remove(original).unwrap_or_default();
        for alias in &aliases {
            self.originals.remove(alias);
        }
        aliases
    }

    /// Number of recorded aliases across all originals.
    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.originals.len()
    }

    pub fn clear(&mut self) {
        self.aliases.clear();
        self.originals.clear();
    }
}
