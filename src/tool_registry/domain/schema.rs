//! Typed parameter schemas and validated tool arguments.
//!
//! Sources describe parameters with the JSON-Schema object subset tools
//! commonly publish (`type: object`, `properties`, `required`,
//! `additionalProperties`). The schema is parsed once at registration, and
//! arguments are validated once at the registry boundary into
//! [`ToolArguments`].

use super::ToolRegistryDomainError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// JSON type accepted for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// A JSON string.
    String,
    /// A JSON number without a fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
    /// Any JSON value.
    Any,
}

impl ParameterType {
    /// Returns the JSON-Schema keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Accepted JSON type.
    pub kind: ParameterType,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Optional human-readable description.
    pub description: Option<String>,
}

/// Parsed parameter schema of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    parameters: BTreeMap<String, ParameterSpec>,
    closed: bool,
}

impl ParameterSchema {
    /// Schema accepting no parameters at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            parameters: BTreeMap::new(),
            closed: true,
        }
    }

    /// Parses a JSON-Schema object description.
    ///
    /// `null` and `{}` are accepted as "any object".
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidSchema`] when the document is
    /// not an object schema, a property type is unknown, or a required entry
    /// names no declared property.
    pub fn from_json(schema: &Value) -> Result<Self, ToolRegistryDomainError> {
        let document = match schema {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            _ => return Err(invalid_schema("schema must be a JSON object")),
        };

        if let Some(kind) = document.get("type")
            && kind.as_str() != Some("object")
        {
            return Err(invalid_schema("top-level type must be 'object'"));
        }

        let mut parameters = BTreeMap::new();
        if let Some(properties) = document.get("properties") {
            let entries = properties
                .as_object()
                .ok_or_else(|| invalid_schema("'properties' must be an object"))?;
            for (name, property) in entries {
                parameters.insert(name.clone(), parse_property(name, property)?);
            }
        }

        if let Some(required) = document.get("required") {
            let names = required
                .as_array()
                .ok_or_else(|| invalid_schema("'required' must be an array"))?;
            for entry in names {
                let name = entry
                    .as_str()
                    .ok_or_else(|| invalid_schema("'required' entries must be strings"))?;
                let spec = parameters.get_mut(name).ok_or_else(|| {
                    invalid_schema(&format!("required parameter '{name}' is not declared"))
                })?;
                spec.required = true;
            }
        }

        let closed = matches!(document.get("additionalProperties"), Some(Value::Bool(false)));
        Ok(Self { parameters, closed })
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Rejects parameters that are not declared.
    #[must_use]
    pub const fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    /// Returns the declared parameters.
    #[must_use]
    pub const fn parameters(&self) -> &BTreeMap<String, ParameterSpec> {
        &self.parameters
    }

    /// Returns whether undeclared parameters are rejected.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Validates raw arguments.
    ///
    /// `null` is treated as an empty argument object.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the arguments are not an object,
    /// a required parameter is missing, a value has the wrong type, or an
    /// undeclared parameter is supplied to a closed schema.
    pub fn validate(&self, arguments: Value) -> Result<ToolArguments, String> {
        let values = match arguments {
            Value::Null => Map::new(),
            Value::Object(object) => object,
            other => return Err(format!("arguments must be an object, got {other}")),
        };

        for (name, spec) in &self.parameters {
            match values.get(name) {
                None if spec.required => {
                    return Err(format!("missing required parameter '{name}'"));
                }
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(format!(
                        "parameter '{name}' must be of type {}",
                        spec.kind.as_str()
                    ));
                }
                _ => {}
            }
        }

        if self.closed
            && let Some(unknown) = values.keys().find(|key| !self.parameters.contains_key(*key))
        {
            return Err(format!("unknown parameter '{unknown}'"));
        }

        Ok(ToolArguments(values))
    }
}

fn parse_property(name: &str, property: &Value) -> Result<ParameterSpec, ToolRegistryDomainError> {
    let document = property
        .as_object()
        .ok_or_else(|| invalid_schema(&format!("property '{name}' must be an object")))?;
    let kind = match document.get("type") {
        None => ParameterType::Any,
        Some(Value::String(keyword)) => ParameterType::parse(keyword).ok_or_else(|| {
            invalid_schema(&format!("property '{name}' has unknown type '{keyword}'"))
        })?,
        Some(_) => {
            return Err(invalid_schema(&format!(
                "property '{name}' type must be a string"
            )));
        }
    };
    let description = document
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_owned);
    Ok(ParameterSpec {
        kind,
        required: false,
        description,
    })
}

fn invalid_schema(reason: &str) -> ToolRegistryDomainError {
    ToolRegistryDomainError::InvalidSchema(reason.to_owned())
}

/// Arguments that passed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArguments(Map<String, Value>);

impl ToolArguments {
    /// Returns one argument.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns every argument.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the arguments as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Returns the hex SHA-256 of the canonical JSON encoding.
    ///
    /// Object keys serialize in sorted order, so argument order never
    /// changes the fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = self.to_value().to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}
