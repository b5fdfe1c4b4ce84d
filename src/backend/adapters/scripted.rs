//! Deterministic in-process backend adapter.

use crate::backend::{
    domain::{BackendDescriptor, BackendError, BackendReply, GenerationRequest},
    ports::{BackendAdapter, ChunkStream},
};
use crate::execution::ExecutionContext;
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One scripted response.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Reply with a complete response; streamed as a single chunk.
    Reply(BackendReply),
    /// Stream the chunks; a one-shot call gets them concatenated.
    Chunks(Vec<String>),
    /// Stream the chunks, then fail mid-stream.
    ChunksThenFail(Vec<String>, BackendError),
    /// Fail immediately.
    Fail(BackendError),
    /// Never answer; only the deadline or cancellation ends the call.
    Hang,
}

/// Backend adapter that replays scripted steps.
///
/// Steps are consumed in order; once the queue is empty the fallback step
/// is repeated. The adapter models a backend without any network I/O and is
/// suitable for tests and local wiring.
#[derive(Debug)]
pub struct ScriptedBackend {
    descriptor: BackendDescriptor,
    steps: Mutex<VecDeque<ScriptStep>>,
    fallback: ScriptStep,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Creates an adapter that replies `content` to every call.
    #[must_use]
    pub fn replying(descriptor: BackendDescriptor, content: impl Into<String>) -> Self {
        let reply = BackendReply::new(content, descriptor.default_model());
        Self::new(descriptor, ScriptStep::Reply(reply))
    }

    /// Creates an adapter that repeats `fallback` once its queue is empty.
    #[must_use]
    pub const fn new(descriptor: BackendDescriptor, fallback: ScriptStep) -> Self {
        Self {
            descriptor,
            steps: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues steps ahead of the fallback.
    #[must_use]
    pub fn with_steps(self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.lock_steps().extend(steps);
        self
    }

    /// Adds a fixed latency before each answer.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queues one more step.
    pub fn push_step(&self, step: ScriptStep) {
        self.lock_steps().push_back(step);
    }

    /// Returns how many invocations (one-shot or streaming) were made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> ScriptStep {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock_steps()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn lock_steps(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptStep>> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait(&self, step: &ScriptStep, context: &ExecutionContext) -> Result<(), BackendError> {
        let latency = self.latency;
        let hang = matches!(step, ScriptStep::Hang);
        context
            .run(async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                if hang {
                    std::future::pending::<()>().await;
                }
            })
            .await
            .map_err(|interrupt| BackendError::timeout(interrupt.to_string()))
    }
}

#[async_trait]
impl BackendAdapter for ScriptedBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> Result<BackendReply, BackendError> {
        let step = self.next_step();
        self.wait(&step, context).await?;
        let model = request
            .model()
            .unwrap_or_else(|| self.descriptor.default_model())
            .to_owned();
        match step {
            ScriptStep::Reply(reply) => Ok(reply),
            ScriptStep::Chunks(chunks) => Ok(BackendReply::new(chunks.concat(), model)),
            ScriptStep::ChunksThenFail(_, error) | ScriptStep::Fail(error) => Err(error),
            ScriptStep::Hang => Err(BackendError::timeout("backend never answered")),
        }
    }

    async fn stream_invoke(
        &self,
        _request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> Result<ChunkStream, BackendError> {
        let step = self.next_step();
        if matches!(step, ScriptStep::Hang) {
            return Ok(stream::pending().boxed());
        }
        self.wait(&step, context).await?;
        match step {
            ScriptStep::Reply(reply) => Ok(stream::iter([Ok(reply.content)]).boxed()),
            ScriptStep::Chunks(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            ScriptStep::ChunksThenFail(chunks, error) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::iter([Err(error)]))
                .boxed()),
            ScriptStep::Fail(error) => Err(error),
            ScriptStep::Hang => Ok(stream::pending().boxed()),
        }
    }
}
