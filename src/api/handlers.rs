//! Request handlers.

use super::AppState;
use crate::agent::tools::get_tool_definitions;
use crate::agent::AgentEvent;
use crate::config::AgentMode;
use crate::error::{ConciergeError, ConciergeResult};
use crate::models::{ChatRequest, ChatResponse, ConversationCreated};
use crate::monitor::MonitorStats;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

const DEFAULT_USER: &str = "demo-user";

/// Query string of the SSE endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub mode: Option<AgentMode>,
}

pub async fn health(State(state): State<AppState>) -> ConciergeResult<Json<Value>> {
    let projects = state.concierge.database().count_projects()?;
    let bookings = state.concierge.database().count_bookings()?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "projects": projects,
        "bookings": bookings,
        "conversations": state.concierge.conversation_count().await,
        "llm": state.concierge.has_llm(),
        "mode": state.concierge.default_mode(),
    })))
}

pub async fn create_conversation(State(state): State<AppState>) -> Json<ConversationCreated> {
    let conversation_id = state.concierge.create_conversation().await;
    debug!("Created conversation {}", conversation_id);
    Json(ConversationCreated { conversation_id })
}

/// `POST /api/agents/chat` with the configured agent.
pub async fn chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> ConciergeResult<Json<ChatResponse>> {
    let outcome = state
        .concierge
        .run_turn(
            payload.conversation_id,
            &payload.message,
            state.concierge.default_mode(),
            None,
        )
        .await?;
    Ok(Json(outcome.into_response(None)))
}

/// `POST /api/vanna/chat`: always the tool agent, with request metadata.
pub async fn tool_agent_chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> ConciergeResult<Json<ChatResponse>> {
    let user_id = payload
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string());

    let outcome = state
        .concierge
        .run_turn(payload.conversation_id, &payload.message, AgentMode::Tools, None)
        .await?;

    let tools: Vec<String> = get_tool_definitions()
        .into_iter()
        .map(|t| t.function.name)
        .collect();
    let metadata = json!({
        "user_id": user_id,
        "agent": outcome.mode,
        "tools_available": tools,
    });
    Ok(Json(outcome.into_response(Some(metadata))))
}

pub async fn stats(State(state): State<AppState>) -> Json<MonitorStats> {
    Json(state.concierge.monitor().snapshot())
}

/// `GET /api/agents/chat/stream`: `tool` events while the turn runs, then
/// one `message` event with the full payload (or `error`), then `done`.
pub async fn chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ConciergeResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if query.message.trim().is_empty() {
        return Err(ConciergeError::Validation("message must not be empty".to_string()));
    }

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(100);
    let mode = query.mode.unwrap_or_else(|| state.concierge.default_mode());

    tokio::spawn(async move {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AgentEvent>();

        let forward_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(AgentEvent::Tool { name }) = event_rx.recv().await {
                let event = Event::default().event("tool").data(json!({ "name": name }).to_string());
                if forward_tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
        });

        let result = state
            .concierge
            .run_turn(query.conversation_id, &query.message, mode, Some(event_tx))
            .await;
        // The sender was moved into the turn, so the forwarder drains and exits.
        let _ = forwarder.await;

        let event = match result.map(|outcome| serde_json::to_string(&outcome.into_response(None))) {
            Ok(Ok(payload)) => Event::default().event("message").data(payload),
            Ok(Err(e)) => error_event(&e.to_string()),
            Err(e) => {
                error!("Stream turn failed: {}", e);
                error_event(&e.to_string())
            }
        };
        let _ = tx.send(Ok(event)).await;
        let _ = tx.send(Ok(Event::default().event("done").data("[DONE]"))).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}
