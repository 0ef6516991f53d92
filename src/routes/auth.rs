use crate::{
    error::{AppError, Result},
    models::user::{LoginRequest, RegisterRequest},
    state::AppState,
    utils::middleware::RequiredAuth,
};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Value>> {
    if !state.is_feature_enabled("registrations") {
        return Err(AppError::forbidden("Registrations are disabled"));
    }

    let user = state.auth_service.register(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": user
    })))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>> {
    let (user, token) = state.auth_service.login(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "user": user,
            "token": token
        }
    })))
}

async fn me(RequiredAuth(user): RequiredAuth) -> Result<Json<Value>> {
    Ok(Json(json!({
        "success": true,
        "data": user
    })))
}

/// 登出即会话结束：释放通知 feed 的所有监听并清掉会话缓存
async fn logout(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
) -> Result<Json<Value>> {
    state.notification_service.stop_feed(&user.id).await;
    state.auth_service.invalidate_session(&user.id).await;

    Ok(Json(json!({
        "success": true,
        "message": "Logged out"
    })))
}
