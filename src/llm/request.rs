use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FunctionSpec, Message, ToolChoice, ToolDefinition};

/// Optional call parameters supplied per request.
///
/// Anything left as `None` (or set to JSON `null` in `extra`) is dropped
/// before dispatch instead of being sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelKwargs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Provider-specific parameters passed through as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelKwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn stop(mut self, stop: Option<Vec<String>>) -> Self {
        self.stop = stop;
        self
    }

    /// Add a provider-specific parameter. `null` values are ignored.
    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        if !value.is_null() {
            self.extra.insert(key.into(), value);
        }
        self
    }
}

/// The outbound parameter set for a single completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub api_base: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<Message>,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            stream: false,
            stop: None,
            api_base: api_base.into(),
            api_key: api_key.into(),
            tools: None,
            tool_choice: None,
            extra: Map::new(),
        }
    }

    /// Apply caller-supplied parameters; only the ones that are set replace
    /// the current values.
    pub fn with_kwargs(mut self, kwargs: ModelKwargs) -> Self {
        if let Some(model) = kwargs.model {
            self.model = model;
        }
        if kwargs.temperature.is_some() {
            self.temperature = kwargs.temperature;
        }
        if kwargs.max_tokens.is_some() {
            self.max_tokens = kwargs.max_tokens;
        }
        if kwargs.stop.is_some() {
            self.stop = kwargs.stop;
        }
        self.extra.extend(
            kwargs
                .extra
                .into_iter()
                .filter(|(_, value)| !value.is_null()),
        );
        self
    }

    /// Offer `spec` as the only tool and force the model to call it.
    pub fn with_function(mut self, spec: &FunctionSpec) -> Self {
        self.tools = Some(vec![spec.as_tool()]);
        self.tool_choice = Some(spec.tool_choice());
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// The request as a flat parameter map, with unset options absent.
    pub fn to_params(&self) -> serde_json::Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}
