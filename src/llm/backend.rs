use std::future::Future;

use async_trait::async_trait;
use futures::StreamExt;
use llm::builder::{FunctionBuilder, LLMBackend, LLMBuilder};
use llm::error::LLMError;
use llm::chat::{
    ChatMessage, ChatRole, FunctionTool, MessageType, StreamChunk as LlmStreamChunk,
    Tool as LlmTool, ToolChoice as LlmToolChoice,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use super::{
    AssistantMessage, ChatCompletion, Choice, ChunkStream, CompletionProvider, CompletionRequest,
    Message, MessageRole, StreamChunk, ToolCall, Usage,
};
use crate::error::ProviderError;

const API_TIMEOUT_SECS: u64 = 120;

/// Model host families reachable through the `llm` crate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// Any OpenAI-compatible endpoint (OpenAI, vLLM, LiteLLM proxy, ...)
    #[default]
    #[value(name = "openai")]
    OpenAI,
    Anthropic,
    Ollama,
    #[value(name = "deepseek")]
    DeepSeek,
    Groq,
    Google,
}

impl ProviderBackend {
    fn llm_backend(self) -> LLMBackend {
        match self {
            ProviderBackend::OpenAI => LLMBackend::OpenAI,
            ProviderBackend::Anthropic => LLMBackend::Anthropic,
            ProviderBackend::Ollama => LLMBackend::Ollama,
            ProviderBackend::DeepSeek => LLMBackend::DeepSeek,
            ProviderBackend::Groq => LLMBackend::Groq,
            ProviderBackend::Google => LLMBackend::Google,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderBackend::OpenAI => "openai",
            ProviderBackend::Anthropic => "anthropic",
            ProviderBackend::Ollama => "ollama",
            ProviderBackend::DeepSeek => "deepseek",
            ProviderBackend::Groq => "groq",
            ProviderBackend::Google => "google",
        }
    }
}

/// [`CompletionProvider`] backed by the `llm` crate.
pub struct LlmCrateProvider {
    backend: ProviderBackend,
    timeout: Duration,
}

impl LlmCrateProvider {
    pub fn new(backend: ProviderBackend) -> Self {
        Self {
            backend,
            timeout: Duration::from_secs(API_TIMEOUT_SECS),
        }
    }

    /// Bound each request by `timeout` instead of the default 120 seconds
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the llm crate client for one request.
    fn build_client(
        &self,
        request: &CompletionRequest,
    ) -> Result<Box<dyn llm::LLMProvider>, ProviderError> {
        // NOTE: the llm crate takes sampling parameters and tools at build
        // time, so a client is built per request.
        let mut builder = LLMBuilder::new()
            .backend(self.backend.llm_backend())
            .api_key(&request.api_key)
            .model(&request.model)
            .timeout_seconds(self.timeout.as_secs().max(1));

        if !request.api_base.is_empty() {
            builder = builder.base_url(&request.api_base);
        }
        if let Some(system) = system_prompt(&request.messages) {
            builder = builder.system(system);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        if let Some(top_p) = request.extra.get("top_p").and_then(|v| v.as_f64()) {
            builder = builder.top_p(top_p as f32);
        }
        if let Some(top_k) = request.extra.get("top_k").and_then(|v| v.as_u64()) {
            builder = builder.top_k(top_k as u32);
        }

        for tool in request.tools.iter().flatten() {
            builder = builder.function(
                FunctionBuilder::new(&tool.function.name)
                    .description(&tool.function.description)
                    .json_schema(tool.function.parameters.clone()),
            );
        }
        if let Some(choice) = &request.tool_choice {
            builder = builder.tool_choice(LlmToolChoice::Tool(choice.function.name.clone()));
        }

        let ignored: Vec<&str> = request
            .extra
            .keys()
            .map(String::as_str)
            .filter(|key| !matches!(*key, "top_p" | "top_k"))
            .collect();
        if !ignored.is_empty() {
            debug!(params = ?ignored, "parameters not supported by the llm crate, ignoring");
        }

        builder
            .build()
            .map_err(|e| ProviderError::Other(anyhow::anyhow!("failed to build LLM client: {e}")))
    }

    fn timeout_error(&self, what: &str) -> ProviderError {
        ProviderError::Timeout(format!(
            "{} {} timed out after {} seconds",
            self.backend.as_str(),
            what,
            self.timeout.as_secs()
        ))
    }

    /// Run one `llm` call under the request timeout.
    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, LLMError>>,
    ) -> Result<T, ProviderError> {
        timeout(self.timeout, call)
            .await
            .map_err(|_| self.timeout_error(what))?
            .map_err(|e| ProviderError::from_llm(&e))
    }
}

#[async_trait]
impl CompletionProvider for LlmCrateProvider {
    fn name(&self) -> &str {
        self.backend.as_str()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        let llm = self.build_client(request)?;
        let chat_messages = convert_messages(&request.messages);
        let llm_tools = build_llm_tools(request);

        let call = async {
            if llm_tools.is_empty() {
                llm.chat(&chat_messages).await
            } else {
                llm.chat_with_tools(&chat_messages, Some(&llm_tools)).await
            }
        };
        let response = self.bounded("API call", call).await?;

        let tool_calls: Vec<ToolCall> = response
            .tool_calls()
            .map(|calls| {
                calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let content = response.text().map(|text| {
            let stop = request.stop.as_deref().unwrap_or_default();
            truncate_at_stop(&text, stop).to_string()
        });
        if content.is_none() && tool_calls.is_empty() {
            warn!(backend = self.backend.as_str(), "API returned empty response text");
        }

        let usage = response.usage().map(|u| Usage {
            prompt_tokens: u.prompt_tokens as u64,
            completion_tokens: u.completion_tokens as u64,
        });

        Ok(ChatCompletion {
            choices: vec![Choice {
                message: AssistantMessage {
                    content,
                    tool_calls,
                },
            }],
            usage,
            model: Some(request.model.clone()),
            // the llm crate exposes neither the fingerprint nor the creation time
            system_fingerprint: None,
            created: None,
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ProviderError> {
        let llm = self.build_client(request)?;
        let chat_messages = convert_messages(&request.messages);

        let stream = self
            .bounded(
                "streaming API call",
                llm.chat_stream_with_tools(&chat_messages, None),
            )
            .await?;

        let filter = StopFilter::new(request.stop.clone().unwrap_or_default());
        let chunks = futures::stream::unfold(
            (stream, filter, false),
            |(mut stream, mut filter, finished)| async move {
                if finished || filter.stopped {
                    return None;
                }
                loop {
                    match stream.next().await {
                        Some(Ok(LlmStreamChunk::Text(text))) => {
                            if let Some(delta) = filter.apply(&text) {
                                let chunk = StreamChunk::text(delta);
                                return Some((Ok(chunk), (stream, filter, false)));
                            }
                            if filter.stopped {
                                return None;
                            }
                        }
                        // tool-use and completion markers carry no text
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "stream chunk error");
                            let err = ProviderError::from_llm(&e);
                            return Some((Err(err), (stream, filter, false)));
                        }
                        None => {
                            let tail = StreamChunk::text(filter.finish()?);
                            return Some((Ok(tail), (stream, filter, true)));
                        }
                    }
                }
            },
        );

        Ok(chunks.boxed())
    }
}

/// Join all system messages into the builder's system prompt.
fn system_prompt(messages: &[Message]) -> Option<String> {
    let parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Convert our messages to the llm crate's ChatMessage format.
///
/// System messages are carried by the builder, not the message list.
fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter_map(|msg| {
            let role = match msg.role {
                MessageRole::User => ChatRole::User,
                MessageRole::Assistant => ChatRole::Assistant,
                MessageRole::System => return None,
            };
            Some(ChatMessage {
                role,
                message_type: MessageType::Text,
                content: msg.content.clone(),
            })
        })
        .collect()
}

fn build_llm_tools(request: &CompletionRequest) -> Vec<LlmTool> {
    request
        .tools
        .iter()
        .flatten()
        .map(|t| LlmTool {
            tool_type: t.tool_type.clone(),
            function: FunctionTool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                parameters: t.function.parameters.clone(),
            },
            cache_control: None,
        })
        .collect()
}

/// Cut `text` at the earliest occurrence of any stop sequence.
fn truncate_at_stop<'a>(text: &'a str, stop: &[String]) -> &'a str {
    let cut = stop
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min();

    match cut {
        Some(idx) => &text[..idx],
        None => text,
    }
}

/// Applies stop sequences to a stream of deltas.
///
/// Text that could still turn into a stop sequence is held back until the
/// next delta settles it. Nothing at or after a stop sequence is released.
struct StopFilter {
    stop: Vec<String>,
    pending: String,
    stopped: bool,
}

impl StopFilter {
    fn new(stop: Vec<String>) -> Self {
        Self {
            stop: stop.into_iter().filter(|s| !s.is_empty()).collect(),
            pending: String::new(),
            stopped: false,
        }
    }

    /// Feed one delta; returns the text that is safe to emit.
    fn apply(&mut self, delta: &str) -> Option<String> {
        if self.stopped {
            return None;
        }
        if self.stop.is_empty() {
            return (!delta.is_empty()).then(|| delta.to_string());
        }

        self.pending.push_str(delta);

        let kept = truncate_at_stop(&self.pending, &self.stop).len();
        if kept < self.pending.len() {
            self.stopped = true;
            self.pending.truncate(kept);
            return self.take_pending();
        }

        let held = self.held_suffix_len();
        let release = self.pending.len() - held;
        let text: String = self.pending.drain(..release).collect();
        (!text.is_empty()).then_some(text)
    }

    /// Release whatever is still held back once the stream ends.
    fn finish(&mut self) -> Option<String> {
        if self.stopped {
            return None;
        }
        self.take_pending()
    }

    fn take_pending(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.pending);
        (!text.is_empty()).then_some(text)
    }

    /// Length of the longest tail of `pending` that starts some stop sequence.
    fn held_suffix_len(&self) -> usize {
        self.pending
            .char_indices()
            .map(|(idx, _)| &self.pending[idx..])
            .find(|tail| self.stop.iter().any(|stop| stop.starts_with(tail)))
            .map_or(0, str::len)
    }
}
