use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::{RegistryError, Result};

/// Identity used when a controller does not name itself.
pub const ANONYMOUS_IDENTITY: &str = "AnonymousController";

/// Separator placed between an identity and its tag.
pub const DEFAULT_SEPARATOR: &str = "-";

/// A validated, non-empty registry key.
///
/// Cloning is cheap; the string is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    /// Validate `raw` as a key.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidKey`] if `raw` is empty.
    ///
    /// ```
    /// use corral::{Key, RegistryError};
    ///
    /// assert_eq!(Key::new("counter").unwrap().as_str(), "counter");
    /// assert_eq!(Key::new(""), Err(RegistryError::InvalidKey));
    /// ```
    pub fn new(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(RegistryError::InvalidKey);
        }
        Ok(Self(Arc::from(raw)))
    }

    /// Derive a key with the default separator and anonymous identity.
    ///
    /// See [`KeyDerivation::derive`].
    pub fn derive(identity: Option<&str>, tag: Option<&str>) -> Self {
        KeyDerivation::default()
            .derive(identity, tag)
            .unwrap_or_else(|_| unreachable!("default anonymous identity is non-empty"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&&*self.0).finish()
    }
}

/// Rules for building keys from a controller identity and an optional tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDerivation {
    pub separator: String,
    pub anonymous_identity: String,
}

impl Default for KeyDerivation {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            anonymous_identity: ANONYMOUS_IDENTITY.to_string(),
        }
    }
}

impl KeyDerivation {
    /// Build `identity` or `identity + separator + tag`.
    ///
    /// A missing or empty identity falls back to the anonymous identity, and an
    /// empty tag counts as no tag. The result depends only on the inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidKey`] if the anonymous identity is empty
    /// and no identity was given.
    ///
    /// ```
    /// use corral::KeyDerivation;
    ///
    /// let derivation = KeyDerivation::default();
    /// assert_eq!(derivation.derive(Some("Counter"), None).unwrap().as_str(), "Counter");
    /// assert_eq!(derivation.derive(Some("Counter"), Some("left")).unwrap().as_str(), "Counter-left");
    /// assert_eq!(derivation.derive(None, None).unwrap().as_str(), "AnonymousController");
    /// ```
    pub fn derive(&self, identity: Option<&str>, tag: Option<&str>) -> Result<Key> {
        let base = identity
            .filter(|identity| !identity.is_empty())
            .unwrap_or(&self.anonymous_identity);

        match tag.filter(|tag| !tag.is_empty()) {
            Some(tag) => Key::new(&format!("{base}{}{tag}", self.separator)),
            None => Key::new(base),
        }
    }
}
