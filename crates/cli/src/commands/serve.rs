//! Serve command handler.
//!
//! Exposes the pipeline over HTTP and WebSocket:
//! - `GET /health`
//! - `POST /api/chat` with a `ChatRequest` body, answered in one piece
//! - `GET /ws`, where each text frame is a `ChatRequest` and the answer
//!   comes back as `ChatEvent` JSON frames
//!
//! Callers are authenticated upstream; `user_id` and `role` are trusted.

use super::load_pipeline;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Json, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use clap::Args;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hrdesk_core::{config::AppConfig, AppResult};
use hrdesk_pipeline::{ChatEvent, ChatRequest, Pipeline};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Run the HTTP/WebSocket chat server
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// Address to listen on (default: server.bind)
    #[arg(long)]
    pub bind: Option<String>,
}

impl ServeCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing serve command");

        let pipeline = Arc::new(load_pipeline(config).await?);
        let bind = self.bind.as_deref().unwrap_or(&config.server.bind);

        let listener = tokio::net::TcpListener::bind(bind).await?;
        tracing::info!("Chat server listening on {}", bind);

        axum::serve(listener, app(AppState { pipeline }))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Chat server stopped");
        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/ws", get(websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn chat_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    match state.pipeline.answer_once(&request).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            tracing::error!("Chat request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// How relaying one answer ended.
enum Relay {
    Completed,
    Disconnected,
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!("WebSocket client connected");

    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let request = match serde_json::from_str::<ChatRequest>(&text) {
            Ok(request) => request,
            Err(e) => {
                let event = ChatEvent::Error {
                    message: format!("Invalid chat request: {}", e),
                };
                if !send_event(&mut sender, &event).await {
                    break;
                }
                continue;
            }
        };

        match relay_answer(&state.pipeline, request, &mut sender, &mut receiver).await {
            Relay::Completed => {}
            Relay::Disconnected => break,
        }
    }

    tracing::debug!("WebSocket client disconnected");
}

/// Stream one answer to the client.
///
/// Returning early drops the answer stream, which stops the generation
/// backend and leaves the session untouched.
async fn relay_answer(
    pipeline: &Pipeline,
    request: ChatRequest,
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
) -> Relay {
    let mut stream = match pipeline.answer_stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            let event = ChatEvent::Error {
                message: e.to_string(),
            };
            return if send_event(sender, &event).await {
                Relay::Completed
            } else {
                Relay::Disconnected
            };
        }
    };

    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else {
                    return Relay::Completed;
                };
                let terminal = event.is_terminal();
                if !send_event(sender, &event).await {
                    tracing::info!("Client went away mid-answer; cancelling");
                    return Relay::Disconnected;
                }
                if terminal {
                    return Relay::Completed;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        tracing::info!("Client closed the socket mid-answer; cancelling");
                        return Relay::Disconnected;
                    }
                    Some(Ok(Message::Text(_))) => {
                        tracing::warn!("Ignoring request received while an answer is streaming");
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Send one event as a JSON text frame; false when the client is gone.
async fn send_event(sender: &mut WsSender, event: &ChatEvent) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize chat event: {}", e);
            return false;
        }
    };
    sender.send(Message::Text(payload)).await.is_ok()
}
