mod backend;
mod function;
mod message;
mod provider;
mod request;
mod response;
mod retry;

pub use backend::{LlmCrateProvider, ProviderBackend};
pub use function::{FunctionDefinition, FunctionSpec, NamedFunction, ToolChoice, ToolDefinition};
pub use message::{Message, MessageRole, messages_from_parts};
pub use provider::{ChunkStream, CompletionProvider};
pub use request::{CompletionRequest, ModelKwargs};
pub use response::{
    AssistantMessage, ChatCompletion, Choice, CompletionResult, Output, ResponseInfo, StreamChunk,
    ToolCall, Usage, normalize,
};
pub use retry::{RetryConfig, retry_transient};
