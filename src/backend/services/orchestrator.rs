//! Backend selection, fallback and tool-plan execution.

use super::{Admission, HealthTracker};
use crate::backend::{
    domain::{
        AttemptOutcome, AttemptRecord, BackendDomainError, BackendError, BackendName,
        BackendReply, CircuitState, GenerationRequest, GenerationResponse, SkipReason,
        ToolCallRecord,
    },
    ports::{BackendAdapter, ChunkStream},
};
use crate::execution::{ContextInterrupt, ExecutionContext};
use crate::streaming::{
    adapters::ConsumerStream,
    domain::{StreamError, StreamSessionId},
    services::{ProducerHandle, StreamChannelManager},
};
use crate::tool_registry::{domain::ToolError, services::ToolExecutor};
use futures::StreamExt;
use mockable::Clock;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Attempt timeout for backends that declare none.
const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// A backend descriptor was rejected at registration.
    #[error(transparent)]
    Configuration(#[from] BackendDomainError),

    /// The request named a backend that is not registered.
    #[error("backend '{0}' is not registered")]
    UnknownBackend(BackendName),

    /// No registered backend can serve the request.
    #[error("no backend can serve this request ({} skipped)", .attempts.len())]
    NoCandidates {
        /// Candidates that were considered but not called.
        attempts: Vec<AttemptRecord>,
    },

    /// A backend failed in a way no other backend can fix.
    #[error("backend '{backend}' failed: {error}")]
    Fatal {
        /// Backend that reported the failure.
        backend: BackendName,
        /// The fatal error.
        error: BackendError,
        /// Attempt log up to and including the fatal attempt.
        attempts: Vec<AttemptRecord>,
    },

    /// Every candidate failed with a retryable error.
    #[error("every candidate backend failed: {}", describe_attempts(.attempts))]
    Exhausted {
        /// Attempt log enumerating each classification.
        attempts: Vec<AttemptRecord>,
    },

    /// The request was cancelled.
    #[error("request was cancelled")]
    Cancelled {
        /// Attempts made before cancellation.
        attempts: Vec<AttemptRecord>,
    },

    /// The request deadline elapsed.
    #[error("request deadline exceeded")]
    DeadlineExceeded {
        /// Attempts made before the deadline.
        attempts: Vec<AttemptRecord>,
    },

    /// A tool call failed and the tool policy makes that fatal to the turn.
    #[error("tool call '{name}' failed: {error}")]
    ToolFailed {
        /// Tool name as requested by the backend.
        name: String,
        /// The tool error.
        error: ToolError,
        /// Attempt log of the turn.
        attempts: Vec<AttemptRecord>,
    },

    /// The stream session could not be set up.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl OrchestratorError {
    /// Returns the attempt log carried by the error, if any.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::NoCandidates { attempts }
            | Self::Fatal { attempts, .. }
            | Self::Exhausted { attempts }
            | Self::Cancelled { attempts }
            | Self::DeadlineExceeded { attempts }
            | Self::ToolFailed { attempts, .. } => attempts,
            Self::Configuration(_) | Self::UnknownBackend(_) | Self::Stream(_) => &[],
        }
    }

    fn interrupted(interrupt: ContextInterrupt, attempts: Vec<AttemptRecord>) -> Self {
        match interrupt {
            ContextInterrupt::Cancelled => Self::Cancelled { attempts },
            ContextInterrupt::DeadlineExceeded => Self::DeadlineExceeded { attempts },
        }
    }
}

fn describe_attempts(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|record| match &record.outcome {
            AttemptOutcome::Succeeded => format!("{}: succeeded", record.backend),
            AttemptOutcome::Failed(error) => format!("{}: {}", record.backend, error.class()),
            AttemptOutcome::Skipped(reason) => format!("{}: skipped ({reason:?})", record.backend),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ordered candidates for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPlan {
    /// Backends to try, in order.
    pub candidates: Vec<BackendName>,
    /// Backends excluded because their circuit is open.
    pub skipped: Vec<AttemptRecord>,
}

/// Caller's view of a streaming request.
#[derive(Debug)]
pub struct StreamHandle {
    /// Session carrying the output.
    pub session_id: StreamSessionId,
    /// Backend producing the chunks.
    pub chosen_backend: BackendName,
    /// Attempt log of the stream set-up.
    pub attempts: Vec<AttemptRecord>,
    /// The caller's own consumer queue.
    pub events: ConsumerStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    OneShot,
    Streaming,
}

enum Served {
    Reply(BackendReply),
    Stream(ChunkStream),
}

struct Walk {
    backend: BackendName,
    served: Served,
    attempts: Vec<AttemptRecord>,
}

/// Routes generation requests across registered backends.
///
/// Candidates are ordered by circuit state, then by the request's fallback
/// list, then by declared priority. Retryable failures fall through to the
/// next candidate; a fatal failure ends the request at once. Every attempt
/// reports its outcome to the [`HealthTracker`].
pub struct ProviderOrchestrator<C>
where
    C: Clock + Send + Sync + 'static,
{
    backends: RwLock<BTreeMap<BackendName, Arc<dyn BackendAdapter>>>,
    health: Arc<HealthTracker<C>>,
    tools: Arc<ToolExecutor<C>>,
    streams: Arc<StreamChannelManager<C>>,
    clock: Arc<C>,
    default_timeout: Duration,
}

impl<C> ProviderOrchestrator<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Creates an orchestrator with no backends.
    #[must_use]
    pub fn new(
        health: Arc<HealthTracker<C>>,
        tools: Arc<ToolExecutor<C>>,
        streams: Arc<StreamChannelManager<C>>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            backends: RwLock::new(BTreeMap::new()),
            health,
            tools,
            streams,
            clock,
            default_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    /// Sets the attempt timeout for backends that declare none.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Returns the health tracker.
    #[must_use]
    pub const fn health(&self) -> &Arc<HealthTracker<C>> {
        &self.health
    }

    /// Returns the stream channel manager.
    #[must_use]
    pub const fn streams(&self) -> &Arc<StreamChannelManager<C>> {
        &self.streams
    }

    /// Registers a backend adapter.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Configuration`] when a backend with the
    /// same name is already registered.
    pub fn register(&self, adapter: Arc<dyn BackendAdapter>) -> OrchestratorResult<()> {
        let name = adapter.descriptor().name().clone();
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        if backends.contains_key(&name) {
            return Err(BackendDomainError::DuplicateBackend(name.to_string()).into());
        }
        self.health.track(&name);
        tracing::info!(
            backend = %name,
            kind = ?adapter.descriptor().kind(),
            priority = adapter.descriptor().priority(),
            "backend registered"
        );
        backends.insert(name, adapter);
        Ok(())
    }

    /// Returns the registered backend names.
    #[must_use]
    pub fn backends(&self) -> Vec<BackendName> {
        self.read_backends().keys().cloned().collect()
    }

    /// Orders the backends able to serve a one-shot request.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownBackend`] when the request names
    /// an unregistered backend and [`OrchestratorError::NoCandidates`] when
    /// nothing is selectable.
    pub fn select(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> OrchestratorResult<BackendPlan> {
        self.plan(request, &effective_context(request, context), Mode::OneShot)
    }

    /// Orders the backends able to serve a streaming request.
    ///
    /// # Errors
    ///
    /// See [`Self::select`].
    pub fn select_streaming(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> OrchestratorResult<BackendPlan> {
        self.plan(request, &effective_context(request, context), Mode::Streaming)
    }

    /// Serves a one-shot request, falling back across candidates and running
    /// any tool calls the chosen backend asks for.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Fatal`] on the first fatal failure,
    /// [`OrchestratorError::Exhausted`] when every candidate failed,
    /// [`OrchestratorError::Cancelled`] or
    /// [`OrchestratorError::DeadlineExceeded`] when the request was
    /// interrupted, and [`OrchestratorError::ToolFailed`] when a tool error
    /// is fatal to the turn.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> OrchestratorResult<GenerationResponse> {
        let started_at = self.clock.utc();
        let started = Instant::now();
        let scoped = effective_context(request, context);
        let walk = self.walk(request, &scoped, Mode::OneShot).await?;
        let Served::Reply(reply) = walk.served else {
            return Err(OrchestratorError::Exhausted {
                attempts: walk.attempts,
            });
        };

        let mut tool_calls = Vec::with_capacity(reply.tool_calls.len());
        for call in reply.tool_calls {
            let result = self
                .tools
                .call(&call.name, call.arguments.clone(), &scoped)
                .await;
            if let Err(error) = &result {
                tracing::debug!(tool = %call.name, error = %error, "tool call failed");
                if scoped.tool_policy().fail_turn_on_error() {
                    return Err(OrchestratorError::ToolFailed {
                        name: call.name,
                        error: error.clone(),
                        attempts: walk.attempts,
                    });
                }
            }
            tool_calls.push(ToolCallRecord {
                name: call.name,
                arguments: call.arguments,
                result,
            });
        }

        tracing::debug!(
            backend = %walk.backend,
            attempts = walk.attempts.len(),
            tools = tool_calls.len(),
            "request served"
        );
        Ok(GenerationResponse {
            content: reply.content,
            chosen_backend: walk.backend,
            model: reply.model,
            tool_calls,
            attempts: walk.attempts,
            started_at,
            elapsed: started.elapsed(),
        })
    }

    /// Serves a streaming request.
    ///
    /// Fallback applies until a backend opens its stream; from then on the
    /// chunks flow through a new stream session. The returned handle carries
    /// the caller's consumer queue; further consumers may subscribe to the
    /// session. The session is cancelled when the request is, and fails
    /// when the request deadline elapses.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn execute_stream(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> OrchestratorResult<StreamHandle> {
        let scoped = effective_context(request, context);
        let walk = self.walk(request, &scoped, Mode::Streaming).await?;
        let Served::Stream(chunks) = walk.served else {
            return Err(OrchestratorError::Exhausted {
                attempts: walk.attempts,
            });
        };

        let producer_context = scoped.for_backend(walk.backend.clone());
        let producer = ProducerHandle::new(
            walk.backend.to_string(),
            producer_context.cancellation().clone(),
        );
        let session_id = self.streams.open(producer);
        let events = self.streams.attach(session_id)?;
        tokio::spawn(pump(
            Arc::clone(&self.streams),
            Arc::clone(&self.health),
            session_id,
            chunks,
            producer_context,
        ));
        Ok(StreamHandle {
            session_id,
            chosen_backend: walk.backend,
            attempts: walk.attempts,
            events,
        })
    }

    fn plan(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
        mode: Mode,
    ) -> OrchestratorResult<BackendPlan> {
        let backends = self.read_backends();
        let fallback = context.fallback_policy();
        let preferred = match request.requested_backend() {
            Some(name) if !backends.contains_key(name) => {
                return Err(OrchestratorError::UnknownBackend(name.clone()));
            }
            Some(name) => Some(name.clone()),
            None => fallback
                .preferred()
                .filter(|name| backends.contains_key(*name))
                .cloned(),
        };

        let mut universe: Vec<BackendName> = if fallback.backends().is_empty() {
            backends.keys().cloned().collect()
        } else {
            fallback
                .backends()
                .iter()
                .filter(|name| backends.contains_key(*name))
                .cloned()
                .collect()
        };
        if let Some(name) = &preferred
            && !universe.contains(name)
        {
            universe.push(name.clone());
        }

        let wants_tools = context.tool_policy().is_enabled();
        let mut ranked = Vec::with_capacity(universe.len());
        let mut skipped = Vec::new();
        for name in universe {
            let Some(adapter) = backends.get(&name) else {
                continue;
            };
            let descriptor = adapter.descriptor();
            let capabilities = descriptor.capabilities();
            let capable = match mode {
                Mode::OneShot => capabilities.supports_text_generation(),
                Mode::Streaming => capabilities.supports_streaming(),
            };
            if !capable || ranked.iter().any(|(ranked_name, _)| ranked_name == &name) {
                continue;
            }
            let circuit = self.health.circuit(&name);
            if circuit == CircuitState::Open {
                tracing::debug!(backend = %name, "skipping backend with open circuit");
                skipped.push(skip(name, SkipReason::CircuitOpen));
                continue;
            }
            let is_preferred = preferred.as_ref() == Some(&name)
                && matches!(circuit, CircuitState::Healthy | CircuitState::Unknown);
            let listed_at = fallback
                .backends()
                .iter()
                .position(|listed| listed == &name)
                .unwrap_or(usize::MAX);
            let key = (
                !is_preferred,
                circuit.rank(),
                wants_tools && !capabilities.supports_tool_calling(),
                listed_at,
                descriptor.priority(),
            );
            ranked.push((name, key));
        }
        ranked.sort_by(|(left_name, left), (right_name, right)| {
            left.cmp(right).then_with(|| left_name.cmp(right_name))
        });

        let candidates: Vec<BackendName> = ranked.into_iter().map(|(name, _)| name).collect();
        if candidates.is_empty() {
            tracing::warn!(skipped = skipped.len(), "no backend can serve the request");
            return Err(OrchestratorError::NoCandidates { attempts: skipped });
        }
        tracing::debug!(candidates = ?candidates, "backend plan built");
        Ok(BackendPlan {
            candidates,
            skipped,
        })
    }

    async fn walk(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
        mode: Mode,
    ) -> OrchestratorResult<Walk> {
        let plan = self.plan(request, context, mode)?;
        let budget = context.fallback_policy().max_attempts();
        let mut attempts = plan.skipped;
        let mut made = 0_u32;

        for backend in plan.candidates {
            if made >= budget {
                attempts.push(skip(backend, SkipReason::AttemptBudgetExhausted));
                continue;
            }
            if let Err(interrupt) = context.check() {
                return Err(OrchestratorError::interrupted(interrupt, attempts));
            }
            let Some(adapter) = self.read_backends().get(&backend).cloned() else {
                continue;
            };
            let _probe = match self.health.admit(&backend) {
                Admission::Ready(permit) => permit,
                Admission::CircuitOpen => {
                    attempts.push(skip(backend, SkipReason::CircuitOpen));
                    continue;
                }
                Admission::ProbeInFlight => {
                    attempts.push(skip(backend, SkipReason::ProbeInFlight));
                    continue;
                }
            };

            made = made.saturating_add(1);
            let backoff = context.fallback_policy().backoff_before(made);
            if !backoff.is_zero()
                && let Err(interrupt) = context.run(tokio::time::sleep(backoff)).await
            {
                return Err(OrchestratorError::interrupted(interrupt, attempts));
            }

            let started = Instant::now();
            let result = self
                .attempt(adapter.as_ref(), &backend, request, context, mode)
                .await;
            let elapsed = started.elapsed();
            match result {
                Ok(served) => {
                    self.health.record_success(&backend);
                    attempts.push(AttemptRecord {
                        backend: backend.clone(),
                        outcome: AttemptOutcome::Succeeded,
                        elapsed,
                    });
                    return Ok(Walk {
                        backend,
                        served,
                        attempts,
                    });
                }
                Err(error) => {
                    if let Err(interrupt) = context.check() {
                        return Err(OrchestratorError::interrupted(interrupt, attempts));
                    }
                    self.health.record_failure(&backend, error.class());
                    attempts.push(AttemptRecord {
                        backend: backend.clone(),
                        outcome: AttemptOutcome::Failed(error.clone()),
                        elapsed,
                    });
                    if !error.is_retryable() {
                        tracing::warn!(backend = %backend, error = %error, "fatal backend failure");
                        return Err(OrchestratorError::Fatal {
                            backend,
                            error,
                            attempts,
                        });
                    }
                    tracing::debug!(backend = %backend, error = %error, "backend failed, falling back");
                }
            }
        }

        if made == 0 {
            tracing::warn!("no candidate backend could be called");
            return Err(OrchestratorError::NoCandidates { attempts });
        }
        tracing::warn!(attempts = %describe_attempts(&attempts), "fallback exhausted");
        Err(OrchestratorError::Exhausted { attempts })
    }

    async fn attempt(
        &self,
        adapter: &dyn BackendAdapter,
        backend: &BackendName,
        request: &GenerationRequest,
        context: &ExecutionContext,
        mode: Mode,
    ) -> Result<Served, BackendError> {
        let timeout = adapter.descriptor().timeout().unwrap_or(self.default_timeout);
        let scoped = context.for_backend(backend.clone()).with_timeout(timeout);
        let outcome = match mode {
            Mode::OneShot => scoped
                .run(adapter.invoke(request, &scoped))
                .await
                .map(|result| result.map(Served::Reply)),
            Mode::Streaming => scoped
                .run(adapter.stream_invoke(request, &scoped))
                .await
                .map(|result| result.map(Served::Stream)),
        };
        outcome.unwrap_or_else(|interrupt| {
            Err(BackendError::timeout(format!(
                "attempt abandoned after {timeout:?}: {interrupt}"
            )))
        })
    }

    fn read_backends(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, BTreeMap<BackendName, Arc<dyn BackendAdapter>>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn effective_context(request: &GenerationRequest, context: &ExecutionContext) -> ExecutionContext {
    let mut scoped = context.child();
    if let Some(timeout) = request.timeout() {
        scoped = scoped.with_timeout(timeout);
    }
    if let Some(tool_policy) = request.tool_policy() {
        scoped = scoped.with_tool_policy(tool_policy.clone());
    }
    if let Some(cache_policy) = request.cache_policy() {
        scoped = scoped.with_cache_policy(cache_policy);
    }
    scoped
}

const fn skip(backend: BackendName, reason: SkipReason) -> AttemptRecord {
    AttemptRecord {
        backend,
        outcome: AttemptOutcome::Skipped(reason),
        elapsed: Duration::ZERO,
    }
}

/// Moves chunks from a backend stream into its session until the stream
/// ends, fails, or the producer is cancelled or out of time.
async fn pump<C>(
    streams: Arc<StreamChannelManager<C>>,
    health: Arc<HealthTracker<C>>,
    session: StreamSessionId,
    mut chunks: ChunkStream,
    context: ExecutionContext,
) where
    C: Clock + Send + Sync + 'static,
{
    loop {
        let next = tokio::select! {
            biased;
            () = context.cancellation().cancelled() => {
                if let Err(err) = streams.cancel(session, "request cancelled") {
                    tracing::debug!(session = %session, error = %err, "session already ended");
                }
                return;
            }
            () = tokio::time::sleep_until(context.deadline()) => {
                if let Err(err) = streams.fail(session, "request deadline exceeded") {
                    tracing::debug!(session = %session, error = %err, "session already ended");
                }
                return;
            }
            item = chunks.next() => item,
        };

        let outcome = match next {
            Some(Ok(chunk)) => streams.push(session, chunk).map(|_| true),
            Some(Err(error)) => {
                if let Some(backend) = context.backend() {
                    health.record_failure(backend, error.class());
                }
                streams.fail(session, error.to_string()).map(|()| false)
            }
            None => streams.complete(session).map(|_| false),
        };
        match outcome {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                tracing::debug!(session = %session, error = %err, "producer stopped");
                return;
            }
        }
    }
}
