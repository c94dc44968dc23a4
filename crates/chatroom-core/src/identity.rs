use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;

/// Name given to connections that do not claim one.
pub const DEFAULT_USERNAME: &str = "guest";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("username must not be empty")]
    Empty,
}

/// A claimed display name. Never empty, never padded with whitespace.
///
/// Ordering is plain lexicographic order over the name, which is what the
/// presence list is sorted by.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Parse a name supplied at connect time, falling back to [`DEFAULT_USERNAME`].
    pub fn or_default(raw: Option<&str>) -> Self {
        raw.and_then(|r| Self::parse(r).ok())
            .unwrap_or_else(|| Self(DEFAULT_USERNAME.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}
