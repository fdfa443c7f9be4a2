use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::tools::{list_tools, Dispatcher, ToolResult};

#[derive(Debug, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/tools", get(tools))
        .route("/call_tool", post(call_tool))
        .layer(CorsLayer::permissive())
        .with_state(dispatcher)
}

/// Serves until ctrl-c.
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "http server listening");
    }

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl_c received; shutting down http server");
            }
        })
        .await
}

async fn status() -> Json<Value> {
    Json(json!({
        "status": "running",
        "service": "gsuite-tools-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn tools() -> Json<Value> {
    let tools: Vec<Value> = list_tools()
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.http_parameters(),
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

async fn call_tool(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(call): Json<ToolCall>,
) -> Json<Value> {
    let task = move || dispatcher.call_tool(&call.name, call.arguments);
    let result = tokio::task::spawn_blocking(task)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "tool call task failed");
            ToolResult::Error(format!("tool call aborted: {}", e))
        });
    Json(result.into_envelope())
}
