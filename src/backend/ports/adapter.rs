//! Uniform capability interface wrapping one external AI backend.

use crate::backend::domain::{BackendDescriptor, BackendError, BackendReply, GenerationRequest};
use crate::execution::ExecutionContext;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Incremental output of a streaming invocation.
///
/// The stream ends after the last chunk; an `Err` item terminates it with a
/// classified failure.
pub type ChunkStream = BoxStream<'static, Result<String, BackendError>>;

/// Backend adapter contract.
///
/// Adapters are stateless per call. They must honour the context's
/// cancellation signal and deadline, and classify every failure as
/// retryable or fatal.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Returns the immutable descriptor of the wrapped backend.
    fn descriptor(&self) -> &BackendDescriptor;

    /// Produces a complete reply.
    ///
    /// # Errors
    ///
    /// Returns a classified [`BackendError`].
    async fn invoke(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> Result<BackendReply, BackendError>;

    /// Opens a chunk stream.
    ///
    /// # Errors
    ///
    /// Returns a classified [`BackendError`] when the stream cannot be
    /// established.
    async fn stream_invoke(
        &self,
        request: &GenerationRequest,
        context: &ExecutionContext,
    ) -> Result<ChunkStream, BackendError>;
}
