#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::StreamExt;

use llm_caller::llm::Choice;
use llm_caller::{
    AssistantMessage, ChatCompletion, ChunkStream, CompletionProvider, CompletionRequest,
    ConnectionConfig, LlmClient, ProviderError, RetryConfig, StreamChunk, ToolCall, Usage,
};

/// One scripted provider outcome.
pub enum Step {
    Reply(ChatCompletion),
    Fail(ProviderError),
    Stream(Vec<Result<StreamChunk, ProviderError>>),
}

/// A provider that replays scripted outcomes in order and records every request.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::from(steps)),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, request: &CompletionRequest) -> Option<Step> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.steps.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        match self.next_step(request) {
            Some(Step::Reply(completion)) => Ok(completion),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Stream(_)) => Err(fatal("scripted a stream for a non-streaming call")),
            None => Err(fatal("ScriptedProvider: no more steps in queue")),
        }
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ProviderError> {
        match self.next_step(request) {
            Some(Step::Stream(chunks)) => Ok(futures::stream::iter(chunks).boxed()),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Reply(_)) => Err(fatal("scripted a reply for a streaming call")),
            None => Err(fatal("ScriptedProvider: no more steps in queue")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A client over `provider` that retries up to `max_attempts` with no delay.
pub fn client(provider: &Arc<ScriptedProvider>, max_attempts: u32) -> LlmClient {
    LlmClient::new(Arc::clone(provider), ConnectionConfig::default())
        .with_retry(RetryConfig::new(max_attempts, 0))
}

pub fn fatal(message: &str) -> ProviderError {
    ProviderError::Other(anyhow::anyhow!(message.to_string()))
}

/// The n-th transient failure, cycling through every transient kind.
pub fn transient(n: u32) -> ProviderError {
    let message = format!("failure {}", n);
    match n % 4 {
        0 => ProviderError::RateLimit(message),
        1 => ProviderError::Connection(message),
        2 => ProviderError::Timeout(message),
        _ => ProviderError::InternalServer(message),
    }
}

pub fn text_reply(text: &str) -> Step {
    Step::Reply(ChatCompletion::from_text(text))
}

pub fn tool_reply(name: &str, arguments: &str) -> Step {
    Step::Reply(ChatCompletion {
        choices: vec![Choice {
            message: AssistantMessage {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }],
            },
        }],
        usage: Some(Usage {
            prompt_tokens: 120,
            completion_tokens: 18,
        }),
        model: Some("gpt-4o-2024-08-06".to_string()),
        system_fingerprint: Some("fp_5050".to_string()),
        created: Some(1_722_000_000),
    })
}

pub fn text_stream(parts: &[&str]) -> Step {
    Step::Stream(
        parts
            .iter()
            .map(|p| Ok(StreamChunk::text(*p)))
            .collect(),
    )
}
