use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{ChatCompletion, CompletionRequest, StreamChunk};
use crate::error::ProviderError;

/// Incremental chunks of a streamed completion.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

/// The single network-facing boundary: one completion call against a model host.
///
/// Implementations perform exactly one request per call and never retry;
/// retrying is the caller's job.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Issue a non-streaming completion request
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion, ProviderError>;

    /// Open a streaming completion request
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ProviderError>;

    /// Get the provider name
    fn name(&self) -> &str;
}

#[async_trait]
impl<P: CompletionProvider + ?Sized> CompletionProvider for std::sync::Arc<P> {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        (**self).complete(request).await
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ProviderError> {
        (**self).complete_stream(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
