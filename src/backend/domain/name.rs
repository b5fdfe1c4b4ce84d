//! Validated backend name type.

use super::BackendDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for a backend name.
const MAX_NAME_LENGTH: usize = 64;

/// Validated backend identifier such as `anthropic`, `openai` or
/// `local-llama`.
///
/// Names are lowercase ASCII letters, digits, `_` and `-`. The `:`
/// separator is reserved for source-qualified tool names and is rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackendName(String);

impl BackendName {
    /// Creates a validated backend name.
    ///
    /// The input is trimmed and lowercased.
    ///
    /// # Errors
    ///
    /// Returns [`BackendDomainError::EmptyBackendName`] when the value is empty
    /// after trimming, [`BackendDomainError::BackendNameTooLong`] when it
    /// exceeds 64 characters, or [`BackendDomainError::InvalidBackendName`]
    /// when it contains characters outside `[a-z0-9_-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, BackendDomainError> {
        let raw = value.into();
        let normalized = raw.trim().to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(BackendDomainError::EmptyBackendName);
        }

        if normalized.len() > MAX_NAME_LENGTH {
            return Err(BackendDomainError::BackendNameTooLong(raw));
        }

        let is_valid = normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !is_valid {
            return Err(BackendDomainError::InvalidBackendName(raw));
        }

        Ok(Self(normalized))
    }

    /// Returns the backend name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BackendName {
    type Error = BackendDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BackendName> for String {
    fn from(value: BackendName) -> Self {
        value.0
    }
}

impl AsRef<str> for BackendName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for BackendName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
