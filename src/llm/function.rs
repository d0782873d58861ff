use serde::{Deserialize, Serialize};

/// A function the model is forced to call, with a JSON schema for its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub json_schema: serde_json::Value,
    pub description: String,
}

impl FunctionSpec {
    pub fn new(
        name: impl Into<String>,
        json_schema: serde_json::Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            json_schema,
            description: description.into(),
        }
    }

    /// Tool definition in the provider's tool-calling format.
    pub fn as_tool(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.json_schema.clone(),
            },
        }
    }

    /// Tool-choice directive forcing the model to call this function.
    pub fn tool_choice(&self) -> ToolChoice {
        ToolChoice {
            choice_type: "function".to_string(),
            function: NamedFunction {
                name: self.name.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoice {
    #[serde(rename = "type")]
    pub choice_type: String,
    pub function: NamedFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFunction {
    pub name: String,
}
