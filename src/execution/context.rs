//! The immutable request-scoped execution context.

use super::{CachePolicy, CallerRole, FallbackPolicy, RequestId, SessionId, ToolPolicy, UserId};
use crate::backend::domain::BackendName;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Timeout applied when the builder is given no deadline.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Horizon used when a requested timeout cannot be represented.
const UNBOUNDED_HORIZON: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns the instant `timeout` from now, saturating at a far horizon.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(UNBOUNDED_HORIZON))
        .unwrap_or(now)
}

/// Reason an operation stopped before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextInterrupt {
    /// The cancellation signal fired.
    #[error("request was cancelled")]
    Cancelled,
    /// The deadline elapsed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Request-scoped carrier of identity, deadline and policy.
///
/// Contexts are passed by reference down every call boundary. Narrower
/// contexts (shorter deadline, a chosen backend, a different tool policy)
/// are derived with the `with_*` methods; derived contexts receive a child
/// cancellation token so cancelling the derived work never cancels the
/// parent, while cancelling the parent cancels every derivative.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    request_id: RequestId,
    session_id: SessionId,
    user_id: UserId,
    caller_role: CallerRole,
    backend: Option<BackendName>,
    cancellation: CancellationToken,
    deadline: Instant,
    cache_policy: CachePolicy,
    fallback_policy: FallbackPolicy,
    tool_policy: ToolPolicy,
}

impl ExecutionContext {
    /// Starts building a context for a session and user.
    #[must_use]
    pub fn builder(session_id: SessionId, user_id: UserId) -> ExecutionContextBuilder {
        ExecutionContextBuilder::new(session_id, user_id)
    }

    /// Returns the request identifier.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the user identifier.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the declared caller role.
    #[must_use]
    pub const fn caller_role(&self) -> CallerRole {
        self.caller_role
    }

    /// Returns the backend chosen for this (derived) context, if any.
    #[must_use]
    pub const fn backend(&self) -> Option<&BackendName> {
        self.backend.as_ref()
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns the absolute deadline.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns the cache policy.
    #[must_use]
    pub const fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Returns the fallback policy.
    #[must_use]
    pub const fn fallback_policy(&self) -> &FallbackPolicy {
        &self.fallback_policy
    }

    /// Returns the tool policy.
    #[must_use]
    pub const fn tool_policy(&self) -> &ToolPolicy {
        &self.tool_policy
    }

    /// Returns the time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns whether the cancellation signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns whether the deadline has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Checks cancellation and deadline without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ContextInterrupt::Cancelled`] when cancelled, otherwise
    /// [`ContextInterrupt::DeadlineExceeded`] when the deadline has elapsed.
    pub fn check(&self) -> Result<(), ContextInterrupt> {
        if self.is_cancelled() {
            return Err(ContextInterrupt::Cancelled);
        }
        if self.is_expired() {
            return Err(ContextInterrupt::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drives `future` until it completes, the context is cancelled, or the
    /// deadline elapses, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`ContextInterrupt`] when the future was abandoned.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, ContextInterrupt>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(ContextInterrupt::Cancelled),
            () = tokio::time::sleep_until(self.deadline) => Err(ContextInterrupt::DeadlineExceeded),
            output = future => Ok(output),
        }
    }

    /// Derives an otherwise identical context with a child cancellation
    /// token.
    #[must_use]
    pub fn child(&self) -> Self {
        self.derive()
    }

    /// Derives a context whose deadline is the earlier of the current one
    /// and `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut derived = self.derive();
        derived.deadline = self.deadline.min(deadline);
        derived
    }

    /// Derives a context that expires after at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.derive(),
        }
    }

    /// Derives a context bound to a chosen backend.
    #[must_use]
    pub fn for_backend(&self, backend: BackendName) -> Self {
        let mut derived = self.derive();
        derived.backend = Some(backend);
        derived
    }

    /// Derives a context with a different tool policy.
    #[must_use]
    pub fn with_tool_policy(&self, tool_policy: ToolPolicy) -> Self {
        let mut derived = self.derive();
        derived.tool_policy = tool_policy;
        derived
    }

    /// Derives a context with a different cache policy.
    #[must_use]
    pub fn with_cache_policy(&self, cache_policy: CachePolicy) -> Self {
        let mut derived = self.derive();
        derived.cache_policy = cache_policy;
        derived
    }

    fn derive(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }
}

/// Builder for [`ExecutionContext`].
#[derive(Debug, Clone)]
pub struct ExecutionContextBuilder {
    session_id: SessionId,
    user_id: UserId,
    caller_role: CallerRole,
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
    cache_policy: CachePolicy,
    fallback_policy: FallbackPolicy,
    tool_policy: ToolPolicy,
}

impl ExecutionContextBuilder {
    fn new(session_id: SessionId, user_id: UserId) -> Self {
        Self {
            session_id,
            user_id,
            caller_role: CallerRole::default(),
            cancellation: None,
            deadline: None,
            cache_policy: CachePolicy::default(),
            fallback_policy: FallbackPolicy::default(),
            tool_policy: ToolPolicy::default(),
        }
    }

    /// Sets the caller role.
    #[must_use]
    pub const fn caller_role(mut self, caller_role: CallerRole) -> Self {
        self.caller_role = caller_role;
        self
    }

    /// Uses `token` as the cancellation signal.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub const fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline relative to now.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(deadline_after(timeout));
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub const fn cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Sets the fallback policy.
    #[must_use]
    pub fn fallback_policy(mut self, fallback_policy: FallbackPolicy) -> Self {
        self.fallback_policy = fallback_policy;
        self
    }

    /// Sets the tool policy.
    #[must_use]
    pub fn tool_policy(mut self, tool_policy: ToolPolicy) -> Self {
        self.tool_policy = tool_policy;
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            request_id: RequestId::new(),
            session_id: self.session_id,
            user_id: self.user_id,
            caller_role: self.caller_role,
            backend: None,
            cancellation: self.cancellation.unwrap_or_default(),
            deadline: self
                .deadline
                .unwrap_or_else(|| deadline_after(DEFAULT_REQUEST_TIMEOUT)),
            cache_policy: self.cache_policy,
            fallback_policy: self.fallback_policy,
            tool_policy: self.tool_policy,
        }
    }
}
