pub mod client;
pub mod config;
pub mod error;
pub mod llm;

pub use client::{ChatStreamMode, LlmClient, Query};
pub use config::{ClientConfig, ConnectionConfig, SamplingConfig};
pub use crate::llm::{
    AssistantMessage, ChatCompletion, ChunkStream, CompletionProvider, CompletionRequest,
    CompletionResult, FunctionSpec, LlmCrateProvider, Message, MessageRole, ModelKwargs, Output,
    ProviderBackend, ResponseInfo, RetryConfig, StreamChunk, ToolCall, Usage,
};
pub use error::{CallError, ProviderError};
