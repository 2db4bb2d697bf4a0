// crates/core/src/ai_client.rs

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

/// Abstract AI/LLM client for tool-calling conversations.
///
/// Implementations can use Azure Foundry, OpenAI, Ollama, etc.
pub trait AiClient {
    /// Send one turn of a conversation and get the model's output items back.
    fn respond(&self, instructions: &str, input: Vec<InputItem>, tools: &[Tool])
        -> Result<Response>;
}

/// One item of conversation input, in Responses API shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum InputItem {
    #[serde(rename = "message")]
    Message { role: String, content: String },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

impl InputItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self::Message {
            role: "user".to_string(),
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Message {
            role: "assistant".to_string(),
            content: text.into(),
        }
    }

    pub fn function_call(call_id: &str, name: &str, arguments: &str) -> Self {
        Self::FunctionCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    pub fn function_output(call_id: &str, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id: call_id.to_string(),
            output: output.into(),
        }
    }
}

/// A function tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl Tool {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Output of one model turn.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub items: Vec<ResponseItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseItem {
    Message(String),
    FunctionCall {
        call_id: String,
        name: String,
        /// Raw JSON string of the arguments.
        arguments: String,
    },
}

impl Response {
    pub fn has_function_calls(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, ResponseItem::FunctionCall { .. }))
    }

    /// First text message, if the model produced one.
    pub fn text(&self) -> Option<&str> {
        self.items.iter().find_map(|item| match item {
            ResponseItem::Message(text) => Some(text.as_str()),
            _ => None,
        })
    }
}
