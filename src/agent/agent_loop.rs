//! Tool-calling agent loop.
//!
//! The LLM is offered every concierge tool. Tool calls are executed and
//! their results appended to the conversation until the model answers in
//! text or the iteration budget runs out, in which case one last
//! completion without tools forces a text answer.

use super::prompts::CONCIERGE_PROMPT;
use super::tools::{get_tool_definitions, ToolExecutor};
use crate::llm::{ChatMessage, ChatModel};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The LLM-chooses-tools agent.
pub struct ToolAgent {
    model: Arc<dyn ChatModel>,
    max_iterations: usize,
    /// Tool exchanges kept in context (sliding window).
    max_context_messages: usize,
}

impl ToolAgent {
    pub fn new(model: Arc<dyn ChatModel>, max_iterations: usize, max_context_messages: usize) -> Self {
        Self {
            model,
            max_iterations: max_iterations.max(1),
            max_context_messages: max_context_messages.max(1),
        }
    }

    /// Run one user turn and return the model's text reply.
    pub async fn run(
        &self,
        executor: &mut ToolExecutor,
        history: &[ChatMessage],
        message: &str,
        context: Option<&str>,
    ) -> Result<String> {
        info!("Starting tool agent with model {}", self.model.name());

        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(ChatMessage::system(CONCIERGE_PROMPT));
        messages.extend(history.iter().cloned());
        if let Some(context) = context {
            messages.push(ChatMessage::system(context));
        }
        messages.push(ChatMessage::user(message));
        let keep_start = messages.len();

        let tools = get_tool_definitions();

        for iteration in 0..self.max_iterations {
            debug!("Agent iteration {}", iteration + 1);

            let reply = self
                .model
                .complete(&messages, &tools)
                .await
                .context("Tool agent request failed")?;

            if !reply.has_tool_calls() {
                return Ok(reply.content);
            }
            let calls = reply.tool_calls.clone().unwrap_or_default();
            messages.push(reply);

            for call in &calls {
                let result = executor.execute(call).await;
                messages.push(ChatMessage::tool(&call.id, result.content()));
                debug!("Tool {} executed (success: {})", call.function.name, result.success);
            }

            let pruned = prune_old_messages(&mut messages, keep_start, self.max_context_messages);
            if pruned > 0 {
                debug!("Pruned {} old messages to save context", pruned);
            }
        }

        warn!(
            "Tool agent reached {} iterations, asking for a final answer",
            self.max_iterations
        );
        let reply = self
            .model
            .complete(&messages, &[])
            .await
            .context("Final answer request failed")?;
        Ok(reply.content)
    }
}

/// Drop the oldest tool exchanges (an assistant message with tool calls
/// plus its tool results) until at most `max_context` messages follow
/// `keep_start`. The most recent exchange is always kept.
///
/// Returns the number of messages removed.
pub fn prune_old_messages(messages: &mut Vec<ChatMessage>, keep_start: usize, max_context: usize) -> usize {
    let mut removed = 0;

    while messages.len().saturating_sub(keep_start) > max_context {
        let mut end = keep_start + 1;
        while end < messages.len() && messages[end].role == "tool" {
            end += 1;
        }
        if end >= messages.len() {
            break;
        }
        removed += end - keep_start;
        messages.drain(keep_start..end);
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::services;
    use crate::agent::tools::{EXECUTE_SQL, UPDATE_UI};
    use crate::llm::testing::ScriptedModel;
    use crate::llm::ToolCall;
    use serde_json::json;

    fn exchange(id: &str, results: usize) -> Vec<ChatMessage> {
        let mut out = vec![ChatMessage {
            tool_calls: Some(vec![ToolCall::new(id, "search_rag", json!({}))]),
            ..ChatMessage::assistant("")
        }];
        for i in 0..results {
            out.push(ChatMessage::tool(id, format!("result {}", i)));
        }
        out
    }

    #[test]
    fn test_prune_removes_whole_exchanges() {
        let mut messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        messages.extend(exchange("a", 2));
        messages.extend(exchange("b", 1));
        messages.extend(exchange("c", 1));

        let removed = prune_old_messages(&mut messages, 2, 4);
        assert_eq!(removed, 3);
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[2].tool_calls.as_ref().unwrap()[0].id, "b");
    }

    #[test]
    fn test_prune_keeps_latest_exchange() {
        let mut messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        messages.extend(exchange("a", 1));
        messages.extend(exchange("b", 5));

        prune_old_messages(&mut messages, 2, 2);
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[2].tool_calls.as_ref().unwrap()[0].id, "b");
    }

    #[tokio::test]
    async fn test_agent_runs_tools_then_answers() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tool(EXECUTE_SQL, json!({"query": "2 bedroom apartments in London"}))
                .call_tool(UPDATE_UI, json!({"shortlisted_project_ids": [6]}))
                .reply("Thames Quay Apartments in London fits."),
        );
        let agent = ToolAgent::new(model.clone(), 8, 10);
        let mut executor = ToolExecutor::new(services(None), None);

        let reply = agent
            .run(&mut executor, &[], "2 bed in London?", None)
            .await
            .unwrap();

        assert_eq!(reply, "Thames Quay Apartments in London fits.");
        assert_eq!(executor.artifacts.tools_used, vec![EXECUTE_SQL, UPDATE_UI]);
        assert_eq!(model.request_count(), 3);

        let requests = model.requests.lock().unwrap();
        let second = &requests[1];
        assert_eq!(second[0].role, "system");
        assert_eq!(second.last().unwrap().role, "tool");
        assert!(second.last().unwrap().content.contains("Thames Quay"));
    }

    #[tokio::test]
    async fn test_agent_stops_at_iteration_limit() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tool(UPDATE_UI, json!({}))
                .call_tool(UPDATE_UI, json!({}))
                .reply("Here is what I found."),
        );
        let agent = ToolAgent::new(model.clone(), 2, 10);
        let mut executor = ToolExecutor::new(services(None), None);

        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let reply = agent
            .run(&mut executor, &history, "anything", Some("extra context"))
            .await
            .unwrap();

        assert_eq!(reply, "Here is what I found.");
        assert_eq!(model.request_count(), 3);
        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0][1].content, "hi");
        assert_eq!(requests[0][3].content, "extra context");
        assert_eq!(requests[0][4].content, "anything");
    }

    #[tokio::test]
    async fn test_agent_propagates_llm_error() {
        let model = Arc::new(ScriptedModel::new().fail("503"));
        let agent = ToolAgent::new(model, 3, 10);
        let mut executor = ToolExecutor::new(services(None), None);
        let err = agent.run(&mut executor, &[], "hi", None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("503"));
    }
}
