use std::time::Instant;

use futures::StreamExt;
use tokio::time::Duration;
use tracing::debug;

use crate::config::{ClientConfig, ConnectionConfig, SamplingConfig};
use crate::error::{CallError, ProviderError};
use crate::llm::{
    AssistantMessage, ChatCompletion, ChunkStream, CompletionProvider, CompletionRequest,
    CompletionResult, FunctionSpec, LlmCrateProvider, Message, ModelKwargs, RetryConfig,
    messages_from_parts, normalize, retry_transient,
};

/// How [`LlmClient::stream_generate`] consumes the chat stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatStreamMode {
    /// Return the delta of the first chunk only and drop the rest of the
    /// stream. Kept for compatibility with callers that rely on it.
    #[default]
    FirstChunk,
    /// Read the whole stream and return the accumulated text
    Drain,
}

/// A single-shot query: optional system and user text, optionally forcing a
/// function call.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub system_message: Option<String>,
    pub user_message: Option<String>,
    pub func_spec: Option<FunctionSpec>,
    /// Send the system text as a user turn, for providers without a system role
    pub convert_system_to_user: bool,
    pub kwargs: ModelKwargs,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system_message = Some(text.into());
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.user_message = Some(text.into());
        self
    }

    pub fn function(mut self, spec: FunctionSpec) -> Self {
        self.func_spec = Some(spec);
        self
    }

    pub fn convert_system_to_user(mut self, convert: bool) -> Self {
        self.convert_system_to_user = convert;
        self
    }

    pub fn kwargs(mut self, kwargs: ModelKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// Retrying client around a [`CompletionProvider`].
///
/// Holds no per-call state, so one client can serve concurrent callers.
pub struct LlmClient {
    provider: Box<dyn CompletionProvider>,
    connection: ConnectionConfig,
    sampling: SamplingConfig,
    retry: RetryConfig,
}

impl LlmClient {
    /// Create a client with default sampling and retry settings.
    pub fn new(provider: impl CompletionProvider + 'static, connection: ConnectionConfig) -> Self {
        Self {
            provider: Box::new(provider),
            connection,
            sampling: SamplingConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Create a client backed by the `llm` crate from a loaded configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        let provider = LlmCrateProvider::new(config.backend)
            .with_timeout(Duration::from_secs(config.connection.timeout_secs));
        Self::new(provider, config.connection.clone())
            .with_sampling(config.sampling.clone())
            .with_retry(config.retry.clone())
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Request with client defaults, then `kwargs` on top.
    fn request(
        &self,
        messages: Vec<Message>,
        kwargs: ModelKwargs,
        stream: bool,
    ) -> CompletionRequest {
        let request = CompletionRequest {
            temperature: Some(self.sampling.temperature),
            max_tokens: Some(self.sampling.max_tokens),
            stop: self.sampling.stop.clone(),
            ..CompletionRequest::new(
                &self.connection.model,
                messages,
                &self.connection.base_url,
                &self.connection.api_key,
            )
        };
        request.with_kwargs(kwargs).streaming(stream)
    }

    /// Chat completion; returns the first choice's message unmodified.
    pub async fn generate(
        &self,
        messages: Vec<Message>,
        kwargs: ModelKwargs,
    ) -> Result<AssistantMessage, CallError> {
        let request = self.request(messages, kwargs, false);
        let completion = self.invoke(&request).await?;
        completion.into_first_message()
    }

    /// Open a chat stream, retrying until it is established.
    pub async fn generate_stream(
        &self,
        messages: Vec<Message>,
        kwargs: ModelKwargs,
    ) -> Result<ChunkStream, CallError> {
        let request = self.request(messages, kwargs, true);
        let provider = self.provider.as_ref();
        let request = &request;

        let stream = retry_transient(&self.retry, "generate_stream", || async move {
            provider.complete_stream(request).await
        })
        .await?;
        Ok(stream)
    }

    /// Streamed chat completion collected into a string according to `mode`.
    ///
    /// A transient failure while reading the stream retries the whole call.
    pub async fn stream_generate(
        &self,
        messages: Vec<Message>,
        kwargs: ModelKwargs,
        mode: ChatStreamMode,
    ) -> Result<String, CallError> {
        let request = self.request(messages, kwargs, true);
        self.stream_text(&request, mode, "stream_generate").await
    }

    /// Text completion of a single prompt; returns the generated text.
    pub async fn complete(&self, prompt: &str, kwargs: ModelKwargs) -> Result<String, CallError> {
        let message = self.generate(vec![Message::user(prompt)], kwargs).await?;
        Ok(message.content.unwrap_or_default())
    }

    /// Streamed text completion of a single prompt; returns the full text.
    pub async fn stream_complete(
        &self,
        prompt: &str,
        kwargs: ModelKwargs,
    ) -> Result<String, CallError> {
        let request = self.request(vec![Message::user(prompt)], kwargs, true);
        self.stream_text(&request, ChatStreamMode::Drain, "stream_complete").await
    }

    /// Single-shot query returning normalized output, usage and metadata.
    ///
    /// Only `query.kwargs` supply sampling parameters; client sampling
    /// defaults are not applied, so unset parameters stay absent.
    pub async fn query(&self, query: Query) -> Result<CompletionResult, CallError> {
        let messages = messages_from_parts(
            query.system_message.as_deref(),
            query.user_message.as_deref(),
            query.convert_system_to_user,
        );

        if let Some(first) = messages.first() {
            debug!(prompt = %first.content, "querying llm");
        }

        let mut request = CompletionRequest::new(
            &self.connection.model,
            messages,
            &self.connection.base_url,
            &self.connection.api_key,
        )
        .with_kwargs(query.kwargs);
        if let Some(spec) = &query.func_spec {
            request = request.with_function(spec);
        }

        let started = Instant::now();
        let completion = self.invoke(&request).await?;
        let elapsed = started.elapsed();

        let result = normalize(completion, query.func_spec.as_ref(), elapsed)?;
        debug!(
            output = ?result.output,
            elapsed_ms = elapsed.as_millis() as u64,
            input_tokens = result.input_tokens,
            output_tokens = result.output_tokens,
            "llm query completed"
        );
        Ok(result)
    }

    async fn invoke(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChatCompletion, ProviderError> {
        let provider = self.provider.as_ref();
        retry_transient(&self.retry, "completion", || async move {
            provider.complete(request).await
        })
        .await
    }

    async fn stream_text(
        &self,
        request: &CompletionRequest,
        mode: ChatStreamMode,
        operation_name: &str,
    ) -> Result<String, CallError> {
        let provider = self.provider.as_ref();
        let text = retry_transient(&self.retry, operation_name, || async move {
            let stream = provider.complete_stream(request).await?;
            collect_stream(stream, mode).await
        })
        .await?;
        Ok(text)
    }
}

async fn collect_stream(
    mut stream: ChunkStream,
    mode: ChatStreamMode,
) -> Result<String, ProviderError> {
    let mut text = String::new();

    while let Some(chunk) = stream.next().await {
        if let Some(delta) = chunk?.delta {
            text.push_str(&delta);
        }
        if mode == ChatStreamMode::FirstChunk {
            break;
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StreamChunk;

    fn chunks(parts: Vec<Result<StreamChunk, ProviderError>>) -> ChunkStream {
        futures::stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn test_drain_skips_empty_deltas() {
        let stream = chunks(vec![
            Ok(StreamChunk::text("Hel")),
            Ok(StreamChunk { delta: None }),
            Ok(StreamChunk::text("lo")),
        ]);
        let text = collect_stream(stream, ChatStreamMode::Drain).await.unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_first_chunk_stops_early() {
        let stream = chunks(vec![
            Ok(StreamChunk::text("Hel")),
            Err(ProviderError::Connection("never read".into())),
        ]);
        let text = collect_stream(stream, ChatStreamMode::FirstChunk)
            .await
            .unwrap();
        assert_eq!(text, "Hel");
    }

    #[tokio::test]
    async fn test_empty_stream_yields_empty_text() {
        let text = collect_stream(chunks(vec![]), ChatStreamMode::FirstChunk)
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_error_propagates() {
        let stream = chunks(vec![
            Ok(StreamChunk::text("Hel")),
            Err(ProviderError::Timeout("stalled".into())),
        ]);
        let err = collect_stream(stream, ChatStreamMode::Drain)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
