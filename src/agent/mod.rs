//! The concierge agent.
//!
//! A turn runs through one of two agents sharing the same tools:
//!
//! - [`graph`]: deterministic routing from extracted intent to a handler
//!   node, followed by optional LLM synthesis of the templated draft.
//! - [`agent_loop`]: the LLM chooses tools in a loop.
//!
//! Conversation state is loaded before and saved after every turn, so
//! follow-ups see earlier filters, the shortlist and the focus project.

pub mod agent_loop;
pub mod graph;
pub mod memory;
pub mod prompts;
pub mod tools;

pub use agent_loop::ToolAgent;
pub use memory::{ConversationState, ConversationStore};

use crate::config::{AgentMode, AgentSettings, Config};
use crate::db::Database;
use crate::error::{ConciergeError, ConciergeResult};
use crate::intent::{self, IntentExtractor};
use crate::llm::{self, ChatModel};
use crate::models::{ChatResponse, Citation, UiContext};
use crate::monitor::Monitor;
use crate::rag::{ContextEnricher, RagIndex};
use crate::sql::TextToSql;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tools::ToolExecutor;
use tracing::{info, warn};

/// Shared backends used by the tools.
pub struct Services {
    pub db: Database,
    pub sql: TextToSql,
    pub rag: RagIndex,
    pub intent: IntentExtractor,
    pub enricher: ContextEnricher,
    pub monitor: Arc<Monitor>,
}

impl Services {
    pub fn new(db: Database, model: Option<Arc<dyn ChatModel>>, config: &Config) -> ConciergeResult<Self> {
        let intent_model = if config.agent.llm_intent {
            model.clone()
        } else {
            None
        };
        let rag = RagIndex::new(db.clone(), model.clone(), &config.rag);

        Ok(Self {
            sql: TextToSql::new(db.clone(), model, &config.sql)?,
            enricher: ContextEnricher::new(rag.clone()),
            rag,
            intent: IntentExtractor::new(intent_model),
            monitor: Arc::new(Monitor::new()),
            db,
        })
    }
}

/// Progress events for streaming clients.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A tool started running.
    Tool { name: String },
}

/// Everything a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub conversation_id: String,
    /// Last `update_ui_context` arguments.
    pub data: Option<UiContext>,
    pub tools_used: Vec<String>,
    pub preview_markdown: Option<String>,
    pub citations: Vec<Citation>,
    /// Agent that actually answered.
    pub mode: AgentMode,
}

impl TurnOutcome {
    pub fn into_response(self, metadata: Option<Value>) -> ChatResponse {
        ChatResponse {
            response: self.response,
            conversation_id: self.conversation_id,
            data: self.data.filter(|d| !d.is_empty()),
            tools_used: (!self.tools_used.is_empty()).then_some(self.tools_used),
            preview_markdown: self.preview_markdown,
            citations: (!self.citations.is_empty()).then_some(self.citations),
            metadata,
        }
    }
}

const EMPTY_REPLY: &str = "I'm sorry, I couldn't put together an answer. Could you rephrase that?";

/// Conversational real-estate concierge.
pub struct Concierge {
    services: Arc<Services>,
    model: Option<Arc<dyn ChatModel>>,
    store: ConversationStore,
    settings: AgentSettings,
    enrich_context: bool,
}

impl Concierge {
    pub fn new(db: Database, model: Option<Arc<dyn ChatModel>>, config: &Config) -> ConciergeResult<Self> {
        match &model {
            Some(m) => info!("Concierge using LLM {}", m.name()),
            None => info!("No LLM configured, running offline (graph and templates only)"),
        }

        Ok(Self {
            services: Arc::new(Services::new(db, model.clone(), config)?),
            model,
            store: ConversationStore::new(config.agent.max_conversations),
            settings: config.agent.clone(),
            enrich_context: config.rag.enrich_context,
        })
    }

    pub async fn create_conversation(&self) -> String {
        self.store.create().await
    }

    pub fn default_mode(&self) -> AgentMode {
        self.settings.mode
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        self.services.monitor.clone()
    }

    pub fn database(&self) -> &Database {
        &self.services.db
    }

    pub fn has_llm(&self) -> bool {
        self.model.is_some()
    }

    pub async fn conversation_count(&self) -> usize {
        self.store.len().await
    }

    /// Answer one message.
    ///
    /// Without a conversation id a new conversation is started. Tool mode
    /// needs an LLM and falls back to the graph without one. Turns on the
    /// same conversation run one at a time.
    pub async fn run_turn(
        &self,
        conversation_id: Option<String>,
        message: &str,
        mode: AgentMode,
        events: Option<UnboundedSender<AgentEvent>>,
    ) -> ConciergeResult<TurnOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ConciergeError::Validation("message must not be empty".to_string()));
        }

        let conversation_id = match conversation_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => self.store.create().await,
        };
        let started = Instant::now();
        let monitor = &self.services.monitor;
        monitor.query_started(&conversation_id, message);

        let mut state = self.store.checkout(&conversation_id).await;
        let mode = match (mode, &self.model) {
            (AgentMode::Tools, None) => {
                warn!("Tool mode needs an LLM, answering with the routing graph");
                AgentMode::Graph
            }
            (mode, _) => mode,
        };

        let mut executor = ToolExecutor::new(self.services.clone(), events);
        let result = match mode {
            AgentMode::Graph => self
                .run_graph(&mut executor, &mut state, message)
                .await
                .map(|response| (response, AgentMode::Graph)),
            AgentMode::Tools => self.run_tools(&mut executor, &mut state, message).await,
        };
        let (response, mode) = match result {
            Ok((response, mode)) if response.trim().is_empty() => (EMPTY_REPLY.to_string(), mode),
            Ok(answered) => answered,
            Err(e) => {
                monitor.query_finished(started.elapsed(), Some(&e.to_string()));
                return Err(e);
            }
        };

        let artifacts = executor.artifacts;
        if let Some(ui) = &artifacts.ui {
            if !ui.shortlisted_project_ids.is_empty() {
                state.shortlisted_ids = ui.shortlisted_project_ids.clone();
            }
        }
        if let [only] = artifacts.cited.as_slice() {
            state.focus_project_id = Some(only.id);
        }
        state.push_turn(message, &response, self.settings.history_limit);
        drop(state);
        monitor.query_finished(started.elapsed(), None);

        Ok(TurnOutcome {
            response,
            conversation_id,
            data: artifacts.ui,
            citations: artifacts.cited.iter().map(|p| p.citation()).collect(),
            tools_used: artifacts.tools_used,
            preview_markdown: artifacts.preview_markdown,
            mode,
        })
    }

    async fn run_graph(
        &self,
        executor: &mut ToolExecutor,
        state: &mut ConversationState,
        message: &str,
    ) -> ConciergeResult<String> {
        let turn = graph::run(executor, state, message).await?;
        let response = self.synthesize(message, &turn).await;
        state.filters = turn.filters;
        Ok(response)
    }

    /// Run the tool agent. Also returns the agent that produced the reply,
    /// which is the graph when the tool agent could not answer.
    async fn run_tools(
        &self,
        executor: &mut ToolExecutor,
        state: &mut ConversationState,
        message: &str,
    ) -> ConciergeResult<(String, AgentMode)> {
        let Some(model) = &self.model else {
            let response = self.run_graph(executor, state, message).await?;
            return Ok((response, AgentMode::Graph));
        };

        let context = if self.enrich_context {
            self.services.enricher.context_for(message).await
        } else {
            None
        };
        let agent = ToolAgent::new(
            model.clone(),
            self.settings.max_iterations,
            self.settings.max_context_messages,
        );

        match agent
            .run(executor, &state.history, message, context.as_deref())
            .await
        {
            Ok(reply) => {
                let mut filters = intent::extract(message);
                filters.inherit_from(&state.filters);
                state.filters = filters;
                Ok((reply, AgentMode::Tools))
            }
            Err(e) => {
                warn!("Tool agent failed, answering with the routing graph: {:#}", e);
                let turn = graph::run(executor, state, message).await?;
                state.filters = turn.filters;
                Ok((turn.draft, AgentMode::Graph))
            }
        }
    }

    /// Rewrite a graph draft with the LLM; the draft itself when offline
    /// or when the LLM fails.
    async fn synthesize(&self, message: &str, turn: &graph::GraphTurn) -> String {
        let Some(model) = &self.model else {
            return turn.draft.clone();
        };

        let system = format!("{}\n\n{}", prompts::CONCIERGE_PROMPT, prompts::SYNTHESIS_PROMPT);
        let mut user = format!("Buyer message: {}\n\nDraft:\n{}", message, turn.draft);
        if !turn.context.is_empty() {
            user.push_str("\n\nTool context:\n");
            user.push_str(&turn.context.join("\n\n"));
        }

        match llm::ask(model.as_ref(), &system, &user).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => turn.draft.clone(),
            Err(e) => {
                warn!("Synthesis failed, returning the draft: {:#}", e);
                turn.draft.clone()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::testing::sample_db;

    pub fn services(model: Option<Arc<dyn ChatModel>>) -> Arc<Services> {
        Arc::new(Services::new(sample_db(), model, &Config::default()).unwrap())
    }

    /// Concierge over the sample inventory. LLM intent extraction is off
    /// so scripted replies are only consumed by the agent itself.
    pub fn concierge(model: Option<Arc<dyn ChatModel>>) -> Concierge {
        let mut config = Config::default();
        config.agent.llm_intent = false;
        Concierge::new(sample_db(), model, &config).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::concierge;
    use super::tools::UPDATE_UI;
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use serde_json::json;

    #[tokio::test]
    async fn test_follow_up_inherits_filters() {
        let concierge = concierge(None);
        let first = concierge
            .run_turn(None, "apartments in London", AgentMode::Graph, None)
            .await
            .unwrap();
        assert!(first.response.contains("Thames Quay Apartments"));
        assert_eq!(first.mode, AgentMode::Graph);

        let second = concierge
            .run_turn(
                Some(first.conversation_id.clone()),
                "what about 3 bedrooms?",
                AgentMode::Graph,
                None,
            )
            .await
            .unwrap();
        assert_eq!(second.conversation_id, first.conversation_id);
        assert!(second
            .response
            .starts_with("I found 1 matching project:\n\n1. **Kensington Garden Residences**"));

        let state = concierge.store.checkout(&first.conversation_id).await;
        assert_eq!(state.turns, 2);
        assert_eq!(state.history.len(), 4);
        assert_eq!(state.history[0].content, "apartments in London");
        assert_eq!(state.shortlisted_ids.len(), 1);
        assert!(state.focus_project_id.is_some());
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let err = concierge(None)
            .run_turn(None, "   ", AgentMode::Graph, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConciergeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_tool_mode_without_llm_uses_graph() {
        let outcome = concierge(None)
            .run_turn(None, "hello", AgentMode::Tools, None)
            .await
            .unwrap();
        assert_eq!(outcome.mode, AgentMode::Graph);
        assert!(outcome.response.starts_with("Hello! I'm your property concierge"));
    }

    #[tokio::test]
    async fn test_tool_mode_reports_ui_data_and_history() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tool(UPDATE_UI, json!({"shortlisted_project_ids": [1, 2]}))
                .reply("Two great options.")
                .reply("Sure."),
        );
        let concierge = concierge(Some(model.clone()));

        let outcome = concierge
            .run_turn(Some("conv-1".into()), "show me options", AgentMode::Tools, None)
            .await
            .unwrap();
        assert_eq!(outcome.response, "Two great options.");
        assert_eq!(outcome.mode, AgentMode::Tools);
        assert_eq!(outcome.tools_used, vec![UPDATE_UI]);
        assert_eq!(outcome.data.clone().unwrap().shortlisted_project_ids, vec![1, 2]);

        concierge
            .run_turn(Some("conv-1".into()), "thanks", AgentMode::Tools, None)
            .await
            .unwrap();
        let requests = model.requests.lock().unwrap();
        let third = &requests[2];
        assert!(third.iter().any(|m| m.role == "user" && m.content == "show me options"));
        assert!(third
            .iter()
            .any(|m| m.role == "assistant" && m.content == "Two great options."));
    }

    #[tokio::test]
    async fn test_graph_synthesis_and_fallback() {
        let model = Arc::new(ScriptedModel::new().reply("Welcome aboard!").fail("timeout"));
        let concierge = concierge(Some(model.clone()));

        let synthesized = concierge
            .run_turn(None, "hello", AgentMode::Graph, None)
            .await
            .unwrap();
        assert_eq!(synthesized.response, "Welcome aboard!");

        let fallback = concierge
            .run_turn(None, "hello", AgentMode::Graph, None)
            .await
            .unwrap();
        assert!(fallback.response.starts_with("Hello! I'm your property concierge"));
        assert_eq!(model.request_count(), 2);
    }

    #[tokio::test]
    async fn test_tool_agent_failure_falls_back_to_graph() {
        let model = Arc::new(ScriptedModel::new().fail("503 Service Unavailable"));
        let outcome = concierge(Some(model))
            .run_turn(None, "hello", AgentMode::Tools, None)
            .await
            .unwrap();
        assert!(outcome.response.starts_with("Hello! I'm your property concierge"));
        assert_eq!(outcome.mode, AgentMode::Graph);
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_conversation_keep_both() {
        let concierge = concierge(None);
        let id = concierge.create_conversation().await;

        let (first, second) = tokio::join!(
            concierge.run_turn(Some(id.clone()), "villas in Dubai", AgentMode::Graph, None),
            concierge.run_turn(Some(id.clone()), "apartments in London", AgentMode::Graph, None),
        );
        first.unwrap();
        second.unwrap();

        let state = concierge.store.checkout(&id).await;
        assert_eq!(state.turns, 2);
        assert_eq!(state.history.len(), 4);
    }

    #[tokio::test]
    async fn test_conversations_are_capped() {
        let mut config = Config::default();
        config.agent.llm_intent = false;
        config.agent.max_conversations = 2;
        let concierge = Concierge::new(crate::db::testing::sample_db(), None, &config).unwrap();

        for _ in 0..5 {
            concierge
                .run_turn(None, "hello", AgentMode::Graph, None)
                .await
                .unwrap();
        }
        assert_eq!(concierge.conversation_count().await, 2);
    }

    #[tokio::test]
    async fn test_monitor_counts_turns() {
        let concierge = concierge(None);
        concierge
            .run_turn(None, "villas in Dubai", AgentMode::Graph, None)
            .await
            .unwrap();
        let _ = concierge.run_turn(None, "", AgentMode::Graph, None).await;

        let stats = concierge.monitor().snapshot();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.successful_queries, 1);
        assert!(stats.tool_usage.contains_key("execute_sql_query"));
    }

    #[test]
    fn test_into_response_nulls_empty_collections() {
        let outcome = TurnOutcome {
            response: "Hi".into(),
            conversation_id: "c".into(),
            data: Some(UiContext::default()),
            tools_used: Vec::new(),
            preview_markdown: None,
            citations: Vec::new(),
            mode: AgentMode::Graph,
        };
        let json = serde_json::to_value(outcome.into_response(None)).unwrap();
        assert!(json["data"].is_null());
        assert!(json["tools_used"].is_null());
        assert!(json["citations"].is_null());
        assert!(json.get("metadata").is_none());
    }
}
