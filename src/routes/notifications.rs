use crate::{
    error::Result,
    models::notification::{FeedEvent, Notification},
    state::AppState,
    utils::middleware::RequiredAuth,
};
use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_feed))
        .route("/ws", get(feed_stream))
        .route("/:message_id/ack", post(acknowledge))
}

/// 当前未读聚合与角标数量
async fn get_feed(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
) -> Result<Json<Value>> {
    state.notification_service.ensure_feed(&user.id).await?;

    let entries = state.notification_service.feed_entries(&user.id).await;
    let feed_state = state.notification_service.feed_state(&user.id).await;

    Ok(Json(json!({
        "success": true,
        "data": {
            "notifications": entries,
            "badge_count": entries.len(),
            "state": feed_state,
        }
    })))
}

/// 确认一条通知；返回房源ID供前端跳转
async fn acknowledge(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Path(message_id): Path<String>,
) -> Result<Json<Value>> {
    let flat_id = state
        .notification_service
        .acknowledge(&user.id, &message_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "flat_id": flat_id }
    })))
}

/// 实时通知流：先推当前聚合快照，之后每次变化推送完整集合
async fn feed_stream(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    state.notification_service.ensure_feed(&user.id).await?;

    let rx = state
        .notification_service
        .subscribe_feed(&user.id)
        .await
        .ok_or_else(|| crate::error::AppError::internal("Notification feed is not available"))?;
    let initial = state.notification_service.feed_entries(&user.id).await;

    Ok(ws.on_upgrade(move |socket| stream_feed(socket, initial, rx)))
}

async fn stream_feed(
    socket: WebSocket,
    initial: Vec<Notification>,
    mut rx: broadcast::Receiver<FeedEvent>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let snapshot = json!({
            "type": "feed",
            "notifications": initial,
            "badge_count": initial.len(),
        });
        if let Ok(payload) = serde_json::to_string(&snapshot) {
            if ws_tx.send(WsMessage::Text(payload)).await.is_err() {
                return;
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = json!({
                        "type": "feed",
                        "notifications": event.entries,
                        "badge_count": event.entries.len(),
                    });
                    match serde_json::to_string(&payload) {
                        Ok(text) => {
                            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => continue,
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

    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }
}
