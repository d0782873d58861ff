use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::FunctionSpec;
use crate::error::CallError;

/// Raw response of a non-streaming completion call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_fingerprint: Option<String>,
    /// Unix timestamp (seconds)
    #[serde(default)]
    pub created: Option<i64>,
}

impl ChatCompletion {
    /// A response with a single text choice and nothing else.
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: AssistantMessage {
                    content: Some(content.into()),
                    tool_calls: Vec::new(),
                },
            }],
            ..Self::default()
        }
    }

    pub fn first_choice(&self) -> Result<&Choice, CallError> {
        self.choices.first().ok_or(CallError::EmptyResponse)
    }

    pub fn into_first_message(self) -> Result<AssistantMessage, CallError> {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(CallError::EmptyResponse)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
}

/// The assistant's reply in a choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// A tool call made by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments exactly as the model produced them
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// One incremental fragment of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: Option<String>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
        }
    }
}

/// The primary output of a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Output {
    Text(String),
    Json(serde_json::Value),
}

impl Output {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(text) => Some(text),
            Output::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Output::Json(value) => Some(value),
            Output::Text(_) => None,
        }
    }
}

/// Provider metadata returned alongside the output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub system_fingerprint: Option<String>,
    pub model: Option<String>,
    /// Unix timestamp (seconds) reported by the provider
    pub created: Option<i64>,
}

impl ResponseInfo {
    /// Provider creation time, when reported and in range.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Normalized result of one successful call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    pub output: Output,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub info: ResponseInfo,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Turn a raw completion into a [`CompletionResult`].
///
/// Without a function spec the first choice's text is the output. With one,
/// the first tool call must name the requested function and its arguments
/// must decode as JSON.
pub fn normalize(
    completion: ChatCompletion,
    func_spec: Option<&FunctionSpec>,
    elapsed: Duration,
) -> Result<CompletionResult, CallError> {
    let choice = completion.first_choice()?;

    let output = match func_spec {
        None => Output::Text(choice.message.content.clone().unwrap_or_default()),
        Some(spec) => Output::Json(decode_function_call(&choice.message, spec)?),
    };

    let usage = completion.usage.unwrap_or_default();

    Ok(CompletionResult {
        output,
        elapsed,
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        info: ResponseInfo {
            system_fingerprint: completion.system_fingerprint,
            model: completion.model,
            created: completion.created,
        },
    })
}

fn decode_function_call(
    message: &AssistantMessage,
    spec: &FunctionSpec,
) -> Result<serde_json::Value, CallError> {
    let call = message.tool_calls.first().ok_or_else(|| {
        CallError::MissingToolCall(message.content.clone().unwrap_or_default())
    })?;

    if call.name != spec.name {
        return Err(CallError::FunctionNameMismatch {
            expected: spec.name.clone(),
            actual: call.name.clone(),
        });
    }

    serde_json::from_str(&call.arguments).map_err(|e| {
        error!(
            function = %call.name,
            arguments = %call.arguments,
            "error decoding the function arguments"
        );
        CallError::MalformedArguments {
            raw: call.arguments.clone(),
            source: e,
        }
    })
}
