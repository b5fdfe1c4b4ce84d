//! Source names, bare tool names and qualified references.

use super::ToolRegistryDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a source or tool name.
const MAX_NAME_LENGTH: usize = 100;

/// Name of the source that owns compiled-in tools.
pub const INTERNAL_SOURCE: &str = "builtin";

/// Validated name of a tool source.
///
/// Source names are trimmed and lowercased; only `[a-z0-9_-]` is accepted so
/// the `:` separator of qualified names is never ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceName(String);

impl SourceName {
    /// Creates a validated source name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when the name is empty, too long
    /// or contains characters outside `[a-z0-9_-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized = value.into().trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ToolRegistryDomainError::EmptySourceName);
        }
        if normalized.len() > MAX_NAME_LENGTH {
            return Err(ToolRegistryDomainError::NameTooLong(normalized));
        }
        let is_valid = normalized.chars().all(|character| {
            character.is_ascii_lowercase()
                || character.is_ascii_digit()
                || character == '_'
                || character == '-'
        });
        if !is_valid {
            return Err(ToolRegistryDomainError::InvalidSourceName(normalized));
        }
        Ok(Self(normalized))
    }

    /// Returns the source that owns compiled-in tools.
    #[must_use]
    pub fn internal() -> Self {
        Self(INTERNAL_SOURCE.to_owned())
    }

    /// Returns whether this is the internal source.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.0 == INTERNAL_SOURCE
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SourceName {
    type Error = ToolRegistryDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SourceName> for String {
    fn from(value: SourceName) -> Self {
        value.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Validated bare tool name as a model or caller asks for it.
///
/// Tool names keep their case (`deleteFile` and `deletefile` are different
/// tools) and may use `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolName(String);

impl ToolName {
    /// Creates a validated tool name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when the name is empty, too long
    /// or contains characters outside `[A-Za-z0-9_.-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(ToolRegistryDomainError::EmptyToolName);
        }
        if normalized.len() > MAX_NAME_LENGTH {
            return Err(ToolRegistryDomainError::NameTooLong(normalized));
        }
        let is_valid = normalized.chars().all(|character| {
            character.is_ascii_alphanumeric() || matches!(character, '_' | '-' | '.')
        });
        if !is_valid {
            return Err(ToolRegistryDomainError::InvalidToolName(normalized));
        }
        Ok(Self(normalized))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ToolName {
    type Error = ToolRegistryDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ToolName> for String {
    fn from(value: ToolName) -> Self {
        value.0
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Source-qualified tool name, written `source:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedToolName {
    source: SourceName,
    tool: ToolName,
}

impl QualifiedToolName {
    /// Combines a source and a bare name.
    #[must_use]
    pub const fn new(source: SourceName, tool: ToolName) -> Self {
        Self { source, tool }
    }

    /// Parses `source:name`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::MissingQualifier`] when the value
    /// has no `:` separator, or the validation error of either half.
    pub fn parse(value: &str) -> Result<Self, ToolRegistryDomainError> {
        let (source, tool) = value
            .split_once(':')
            .ok_or_else(|| ToolRegistryDomainError::MissingQualifier(value.to_owned()))?;
        Ok(Self::new(SourceName::new(source)?, ToolName::new(tool)?))
    }

    /// Returns the owning source.
    #[must_use]
    pub const fn source(&self) -> &SourceName {
        &self.source
    }

    /// Returns the bare tool name.
    #[must_use]
    pub const fn tool(&self) -> &ToolName {
        &self.tool
    }
}

impl TryFrom<String> for QualifiedToolName {
    type Error = ToolRegistryDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<QualifiedToolName> for String {
    fn from(value: QualifiedToolName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for QualifiedToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.source, self.tool)
    }
}

/// A name as supplied to `resolve`: bare or qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolReference {
    /// A bare name, subject to the collision policy.
    Bare(ToolName),
    /// A qualified name, resolved directly.
    Qualified(QualifiedToolName),
}

impl ToolReference {
    /// Parses a bare or `source:name` reference.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when either part is invalid.
    pub fn parse(value: &str) -> Result<Self, ToolRegistryDomainError> {
        if value.contains(':') {
            QualifiedToolName::parse(value.trim()).map(Self::Qualified)
        } else {
            ToolName::new(value).map(Self::Bare)
        }
    }
}

impl fmt::Display for ToolReference {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare(name) => name.fmt(formatter),
            Self::Qualified(name) => name.fmt(formatter),
        }
    }
}
