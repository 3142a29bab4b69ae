//! Chat-completion and embedding models.
//!
//! Messages use the OpenAI chat format. The concierge talks to models
//! only through [`ChatModel`], so the HTTP client can be swapped for a
//! scripted double in tests.

pub mod openai;

pub use openai::OpenAiClient;

use crate::agent::tools::ToolDefinition;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message in the chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Result of a tool call, linked back to the call id.
    pub fn tool(call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.to_string()),
            ..Self::new("tool", content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as sent on the wire.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Decoded arguments; malformed JSON yields an empty object.
    pub fn arguments(&self) -> Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// A chat-completion and embedding backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model or deployment name, for logs and metadata.
    fn name(&self) -> &str;

    /// Run one completion. The reply is an assistant message that may
    /// carry tool calls instead of text.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolDefinition])
        -> Result<ChatMessage>;

    /// Embed a batch of texts, one vector per input.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Send a system + user prompt without tools and return the text reply.
pub async fn ask(model: &dyn ChatModel, system: &str, user: &str) -> Result<String> {
    let reply = model
        .complete(&[ChatMessage::system(system), ChatMessage::user(user)], &[])
        .await?;
    Ok(reply.content)
}

/// Strip a surrounding markdown code fence (```json, ```sql, ...) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_arguments() {
        let call = ToolCall::new("call_1", "execute_sql_query", json!({"query": "villas"}));
        assert_eq!(call.arguments()["query"], "villas");

        let broken = ToolCall {
            function: FunctionCall {
                name: "x".into(),
                arguments: "{not json".into(),
            },
            ..call
        };
        assert!(broken.arguments().as_object().unwrap().is_empty());
    }

    #[test]
    fn test_tool_message_serialization() {
        let msg = ChatMessage::tool("call_9", "3 rows");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_9");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  SELECT 2 "), "SELECT 2");
    }

    #[tokio::test]
    async fn test_ask_returns_text() {
        let model = testing::ScriptedModel::new().reply("hello there");
        let text = ask(&model, "sys", "hi").await.unwrap();
        assert_eq!(text, "hello there");
        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0][0].role, "system");
        assert_eq!(requests[0][1].content, "hi");
    }
}
