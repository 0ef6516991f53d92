use crate::{
    error::{AppError, Result},
    models::message::{Message, MessageEvent, SendMessageRequest},
    state::AppState,
    utils::middleware::{OptionalAuth, RequiredAuth},
};
use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/flat/:flat_id", get(get_thread))
        .route("/flat/:flat_id", post(send_message))
        .route("/flat/:flat_id/ws", get(message_stream))
}

#[derive(Debug, Deserialize)]
struct ThreadQuery {
    /// 逗号分隔的已展开消息ID集合
    expand: Option<String>,
}

async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(flat_id): Path<String>,
    Query(query): Query<ThreadQuery>,
    OptionalAuth(user): OptionalAuth,
) -> Result<Json<Value>> {
    let expanded: HashSet<String> = query
        .expand
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .collect();

    let thread = state
        .message_service
        .get_thread(&flat_id, user.as_ref(), &expanded)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": thread
    })))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Path(flat_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Value>> {
    if !state.is_feature_enabled("messages") {
        return Err(AppError::forbidden("Messaging is disabled"));
    }

    let message = state
        .message_service
        .send_message(&flat_id, &user, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": message
    })))
}

/// 一个房源的实时消息流：先推当前消息列表，之后逐条推送新事件。
/// 客户端断开后接收端被丢弃，订阅随之释放。
async fn message_stream(
    State(state): State<Arc<AppState>>,
    Path(flat_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    state
        .flat_service
        .get_flat(&flat_id)
        .await?
        .ok_or_else(|| AppError::not_found("Flat"))?;

    let rx = state.message_service.subscribe(&flat_id);
    let initial = state.message_service.get_flat_messages(&flat_id).await?;

    Ok(ws.on_upgrade(move |socket| stream_messages(socket, initial, rx)))
}

async fn stream_messages(
    socket: WebSocket,
    initial: Vec<Message>,
    mut rx: broadcast::Receiver<MessageEvent>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let snapshot = json!({ "type": "snapshot", "messages": initial });
        if let Ok(payload) = serde_json::to_string(&snapshot) {
            if ws_tx.send(WsMessage::Text(payload)).await.is_err() {
                return;
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = json!({ "type": "message", "message": event.message });
                    match serde_json::to_string(&payload) {
                        Ok(text) => {
                            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("Failed to serialize message event: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut receive_task = tokio::spawn(async move {
        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(WsMessage::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    // 任一侧结束就放掉另一侧，确保订阅不过期滞留
    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }
}
