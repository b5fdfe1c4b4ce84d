//! Tool specifications as published by sources, and registry descriptors.

use super::{ParameterSchema, QualifiedToolName, SourceName, ToolName, ToolRegistryDomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Declared side effects of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectClass {
    /// Observes state only. Results may be cached.
    ReadOnly,
    /// Changes state. Never cached, and needs an explicit allow.
    Mutating,
}

impl SideEffectClass {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Mutating => "mutating",
        }
    }
}

impl fmt::Display for SideEffectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a tool comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Compiled into the process.
    Internal,
    /// Discovered from an external tool source.
    External,
}

/// Whether a registered tool can currently be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Offered by a connected source.
    Available,
    /// Missing from the latest snapshot of its source; removed if the next
    /// snapshot still omits it.
    Withdrawn,
    /// Its source disconnected.
    Disconnected,
}

/// A tool as a source publishes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    name: ToolName,
    description: String,
    schema: ParameterSchema,
    side_effect: SideEffectClass,
}

impl ToolSpec {
    /// Creates a spec from a JSON-Schema parameter document.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] for an invalid name, a blank
    /// description or a malformed schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &Value,
        side_effect: SideEffectClass,
    ) -> Result<Self, ToolRegistryDomainError> {
        let tool_name = ToolName::new(name)?;
        let normalized_description = description.into().trim().to_owned();
        if normalized_description.is_empty() {
            return Err(ToolRegistryDomainError::EmptyToolDescription(
                tool_name.to_string(),
            ));
        }
        Ok(Self {
            schema: ParameterSchema::from_json(parameters)?,
            name: tool_name,
            description: normalized_description,
            side_effect,
        })
    }

    /// Replaces the schema with an already parsed one.
    #[must_use]
    pub fn with_schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Returns the bare tool name.
    #[must_use]
    pub const fn name(&self) -> &ToolName {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the parameter schema.
    #[must_use]
    pub const fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Returns the side-effect class.
    #[must_use]
    pub const fn side_effect(&self) -> SideEffectClass {
        self.side_effect
    }
}

/// A tool as the registry tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    qualified_name: QualifiedToolName,
    spec: ToolSpec,
    source_kind: SourceKind,
    availability: Availability,
    discovered_at: DateTime<Utc>,
}

impl ToolDescriptor {
    /// Creates an available descriptor for `spec` offered by `source`.
    #[must_use]
    pub fn new(source: SourceName, spec: ToolSpec, discovered_at: DateTime<Utc>) -> Self {
        let source_kind = if source.is_internal() {
            SourceKind::Internal
        } else {
            SourceKind::External
        };
        Self {
            qualified_name: QualifiedToolName::new(source, spec.name().clone()),
            spec,
            source_kind,
            availability: Availability::Available,
            discovered_at,
        }
    }

    /// Returns the source-qualified name.
    #[must_use]
    pub const fn qualified_name(&self) -> &QualifiedToolName {
        &self.qualified_name
    }

    /// Returns the bare name.
    #[must_use]
    pub const fn name(&self) -> &ToolName {
        self.qualified_name.tool()
    }

    /// Returns the owning source.
    #[must_use]
    pub const fn source(&self) -> &SourceName {
        self.qualified_name.source()
    }

    /// Returns the published spec.
    #[must_use]
    pub const fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// Returns the parameter schema.
    #[must_use]
    pub const fn schema(&self) -> &ParameterSchema {
        self.spec.schema()
    }

    /// Returns the side-effect class.
    #[must_use]
    pub const fn side_effect(&self) -> SideEffectClass {
        self.spec.side_effect()
    }

    /// Returns whether the tool is compiled in or discovered.
    #[must_use]
    pub const fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    /// Returns the current availability.
    #[must_use]
    pub const fn availability(&self) -> Availability {
        self.availability
    }

    /// Returns whether the tool can be invoked.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    /// Returns when the tool was (re)discovered.
    #[must_use]
    pub const fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub(crate) fn with_spec(mut self, spec: ToolSpec) -> Self {
        self.spec = spec;
        self
    }

    pub(crate) const fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }
}
