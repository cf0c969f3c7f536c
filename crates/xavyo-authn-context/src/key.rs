//! Correlation keys and key allocation.
//!
//! A correlation key is the opaque value round-tripped through an external
//! redirect so that the return leg can find its in-flight flow. Three kinds
//! exist:
//!
//! - the **default key**, a well-known constant used when a session has at
//!   most one flow outstanding (no key needs to travel in the redirect);
//! - a **random key**, 256 bits from the OS CSPRNG, used when flows of the
//!   same session must be told apart;
//! - a **client-instance key**, `"{instance}@{session}"`, which recognises a
//!   browser tab reconnecting after a reload.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Number of random bytes in a random key (before base64url encoding).
pub const RANDOM_KEY_BYTES: usize = 32;

/// Number of leading characters of a key that may appear in logs.
const FINGERPRINT_LEN: usize = 8;

/// Opaque, comparable, immutable correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Value of the well-known default key.
    pub const DEFAULT: &'static str = "_default";

    /// The well-known default key.
    #[must_use]
    pub fn default_key() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// A fresh, unguessable key.
    ///
    /// Uses `OsRng` directly; never a seeded or thread-local generator.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; RANDOM_KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Key derived from a client (UI) instance id and the session id.
    ///
    /// Deterministic, and only as unguessable as the session id is.
    #[must_use]
    pub fn for_client_instance(instance_id: &str, session_id: &str) -> Self {
        Self(format!("{instance_id}@{session_id}"))
    }

    /// Whether this is the well-known default key.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// The raw key, suitable for embedding in a redirect URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to put in logs.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        match self.0.char_indices().nth(FINGERPRINT_LEN) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl Display for CorrelationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for CorrelationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How `begin` allocates a key for a new flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAllocation {
    /// Always the well-known default key: one flow per session at a time.
    Default,
    /// A fresh random key per flow: concurrent flows per session.
    #[default]
    Random,
}

impl KeyAllocation {
    /// Produce a key according to this allocation policy.
    #[must_use]
    pub fn allocate(self) -> CorrelationKey {
        match self {
            Self::Default => CorrelationKey::default_key(),
            Self::Random => CorrelationKey::random(),
        }
    }
}

impl FromStr for KeyAllocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown key allocation '{other}'")),
        }
    }
}
