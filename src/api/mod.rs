//! HTTP interface.
//!
//! JSON chat endpoints for both agents, conversation creation, an SSE
//! stream that reports tools as they run, plus health and usage stats.

pub mod handlers;

use crate::agent::Concierge;
use anyhow::{Context, Result};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub concierge: Arc<Concierge>,
}

impl AppState {
    pub fn new(concierge: Concierge) -> Self {
        Self {
            concierge: Arc::new(concierge),
        }
    }
}

/// Permissive CORS for browser frontends.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/agents/chat", post(handlers::chat))
        .route("/api/agents/chat/stream", get(handlers::chat_stream))
        .route("/api/agents/conversations", post(handlers::create_conversation))
        .route("/api/conversations", post(handlers::create_conversation))
        .route("/api/agents/stats", get(handlers::stats))
        .route("/api/vanna/chat", post(handlers::tool_agent_chat))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Bind and serve until Ctrl+C.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let monitor = state.concierge.monitor();
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    monitor.log_summary();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
