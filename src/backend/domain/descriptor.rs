//! Backend descriptors and capability metadata.

use super::{BackendDomainError, BackendName};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a backend is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// A hosted HTTP API.
    HostedApi,
    /// A locally spawned process or in-process model.
    LocalProcess,
}

/// Shape of the credentials a backend expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthRequirement {
    /// No credentials.
    None,
    /// An API key read from an environment variable.
    ApiKey {
        /// Name of the variable holding the key.
        env_var: String,
    },
    /// An OAuth token obtained by the surrounding product.
    OAuth,
    /// Credentials managed by a local tool (CLI login, keychain).
    LocalCredential,
}

/// Declared capabilities of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    text_generation: bool,
    streaming: bool,
    tool_calling: bool,
}

impl BackendCapabilities {
    /// Creates a capability set.
    #[must_use]
    pub const fn new(text_generation: bool, streaming: bool, tool_calling: bool) -> Self {
        Self {
            text_generation,
            streaming,
            tool_calling,
        }
    }

    /// Text generation, streaming and tool calling.
    #[must_use]
    pub const fn full() -> Self {
        Self::new(true, true, true)
    }

    /// Returns whether one-shot text generation is supported.
    #[must_use]
    pub const fn supports_text_generation(&self) -> bool {
        self.text_generation
    }

    /// Returns whether streaming responses are supported.
    #[must_use]
    pub const fn supports_streaming(&self) -> bool {
        self.streaming
    }

    /// Returns whether the backend can request tool calls.
    #[must_use]
    pub const fn supports_tool_calling(&self) -> bool {
        self.tool_calling
    }
}

/// Immutable identity and metadata of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    name: BackendName,
    kind: BackendKind,
    capabilities: BackendCapabilities,
    auth: AuthRequirement,
    default_model: String,
    priority: u32,
    timeout: Option<Duration>,
}

impl BackendDescriptor {
    /// Creates a validated descriptor.
    ///
    /// Priority defaults to `100` (lower is preferred) and the timeout to the
    /// orchestrator-wide default.
    ///
    /// # Errors
    ///
    /// Returns [`BackendDomainError::EmptyDefaultModel`] when the model is
    /// blank or [`BackendDomainError::NoGenerationCapability`] when the
    /// capabilities allow neither generation mode.
    pub fn new(
        name: BackendName,
        kind: BackendKind,
        capabilities: BackendCapabilities,
        default_model: impl Into<String>,
    ) -> Result<Self, BackendDomainError> {
        let model = default_model.into().trim().to_owned();
        if model.is_empty() {
            return Err(BackendDomainError::EmptyDefaultModel(name.to_string()));
        }
        if !capabilities.supports_text_generation() && !capabilities.supports_streaming() {
            return Err(BackendDomainError::NoGenerationCapability(
                name.to_string(),
            ));
        }

        Ok(Self {
            name,
            kind,
            capabilities,
            auth: AuthRequirement::None,
            default_model: model,
            priority: 100,
            timeout: None,
        })
    }

    /// Sets the auth requirement.
    ///
    /// # Errors
    ///
    /// Returns [`BackendDomainError::EmptyCredentialVariable`] for an API-key
    /// requirement with a blank variable name.
    pub fn with_auth(mut self, auth: AuthRequirement) -> Result<Self, BackendDomainError> {
        if let AuthRequirement::ApiKey { env_var } = &auth
            && env_var.trim().is_empty()
        {
            return Err(BackendDomainError::EmptyCredentialVariable(
                self.name.to_string(),
            ));
        }
        self.auth = auth;
        Ok(self)
    }

    /// Sets the declared priority; lower values are tried first among
    /// backends in the same health class.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the per-backend attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BackendDomainError::ZeroTimeout`] for a zero duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, BackendDomainError> {
        if timeout.is_zero() {
            return Err(BackendDomainError::ZeroTimeout(self.name.to_string()));
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn name(&self) -> &BackendName {
        &self.name
    }

    /// Returns how the backend is reached.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Returns the declared capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    /// Returns the auth requirement.
    #[must_use]
    pub const fn auth(&self) -> &AuthRequirement {
        &self.auth
    }

    /// Returns the default model identifier.
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Returns the declared priority.
    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.priority
    }

    /// Returns the declared per-backend timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
