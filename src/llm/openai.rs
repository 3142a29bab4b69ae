//! HTTP client for OpenAI and Azure OpenAI chat/embedding endpoints.

use super::{ChatMessage, ChatModel, ToolCall};
use crate::agent::tools::ToolDefinition;
use crate::config::LlmProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Chat completions request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    temperature: f32,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible client; Azure deployments use the same payloads
/// with a different URL scheme and auth header.
pub struct OpenAiClient {
    provider: LlmProvider,
    http_client: reqwest::Client,
    timeout_seconds: u64,
}

impl OpenAiClient {
    pub fn new(provider: LlmProvider, timeout_seconds: u64) -> Result<Self> {
        info!("Initializing LLM client for {}", provider.chat_model());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            provider,
            http_client,
            timeout_seconds,
        })
    }

    fn chat_url(&self) -> String {
        match &self.provider {
            LlmProvider::Azure {
                endpoint,
                api_version,
                chat_deployment,
                ..
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, chat_deployment, api_version
            ),
            LlmProvider::OpenAi { base_url, .. } => format!("{}/chat/completions", base_url),
        }
    }

    fn embeddings_url(&self) -> String {
        match &self.provider {
            LlmProvider::Azure {
                endpoint,
                api_version,
                embedding_deployment,
                ..
            } => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                endpoint, embedding_deployment, api_version
            ),
            LlmProvider::OpenAi { base_url, .. } => format!("{}/embeddings", base_url),
        }
    }

    /// Azure routes by deployment in the URL, so the model field is omitted.
    fn chat_model_field(&self) -> Option<&str> {
        match &self.provider {
            LlmProvider::Azure { .. } => None,
            LlmProvider::OpenAi { model, .. } => Some(model),
        }
    }

    fn embedding_model_field(&self) -> Option<&str> {
        match &self.provider {
            LlmProvider::Azure { .. } => None,
            LlmProvider::OpenAi {
                embedding_model, ..
            } => Some(embedding_model),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.provider {
            LlmProvider::Azure { api_key, .. } => request.header("api-key", api_key),
            LlmProvider::OpenAi { api_key, .. } => request.bearer_auth(api_key),
        }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .authorize(self.http_client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to LLM endpoint at {}", url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM API error {}: {}", status, body));
        }

        response
            .json()
            .await
            .context("Failed to parse LLM response")
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    fn name(&self) -> &str {
        self.provider.chat_model()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage> {
        let request = ChatRequest {
            model: self.chat_model_field(),
            messages,
            tools,
            temperature: self.provider.temperature(),
        };

        debug!(
            "Sending chat request with {} messages and {} tools",
            messages.len(),
            tools.len()
        );

        let response: ChatResponse = self.post_json(&self.chat_url(), &request).await?;
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .context("LLM response contained no choices")?;

        Ok(ChatMessage {
            tool_calls: message.tool_calls.filter(|calls| !calls.is_empty()),
            ..ChatMessage::assistant(message.content.unwrap_or_default())
        })
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.embedding_model_field(),
            input: inputs,
        };
        let mut response: EmbeddingResponse =
            self.post_json(&self.embeddings_url(), &request).await?;

        if response.data.len() != inputs.len() {
            anyhow::bail!(
                "Embedding count mismatch: sent {}, received {}",
                inputs.len(),
                response.data.len()
            );
        }

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure() -> LlmProvider {
        LlmProvider::Azure {
            endpoint: "https://res.openai.azure.com".into(),
            api_key: "key".into(),
            api_version: "2024-05-01-preview".into(),
            chat_deployment: "gpt-4o-mini".into(),
            embedding_deployment: "text-embedding-3-small".into(),
        }
    }

    fn openai() -> LlmProvider {
        LlmProvider::OpenAi {
            base_url: "https://api.openai.com/v1".into(),
            api_key: "sk".into(),
            model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
        }
    }

    #[test]
    fn test_azure_urls() {
        let client = OpenAiClient::new(azure(), 5).unwrap();
        assert_eq!(
            client.chat_url(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-05-01-preview"
        );
        assert!(client
            .embeddings_url()
            .contains("/deployments/text-embedding-3-small/embeddings"));
        assert!(client.chat_model_field().is_none());
    }

    #[test]
    fn test_openai_urls() {
        let client = OpenAiClient::new(openai(), 5).unwrap();
        assert_eq!(client.chat_url(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(client.embeddings_url(), "https://api.openai.com/v1/embeddings");
        assert_eq!(client.chat_model_field(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: Some("gpt-4o-mini"),
            messages: &messages,
            tools: &[],
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_parse_tool_call_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_1","type":"function",
            "function":{"name":"execute_sql_query","arguments":"{\"query\":\"2 bed in Dubai\"}"}}]}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let message = &parsed.choices[0].message;
        assert!(message.content.is_none());
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].arguments()["query"], "2 bed in Dubai");
    }
}
