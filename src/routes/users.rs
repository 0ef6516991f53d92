use crate::{
    error::{AppError, Result},
    models::user::*,
    state::AppState,
    utils::middleware::{AdminAuth, RequiredAuth},
    utils::pagination::{PageState, SortOrder},
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_users))
        .route("/me", put(update_profile))
        .route("/me/favorites", get(list_favorites))
        .route("/me/favorites/:flat_id", post(add_favorite))
        .route("/me/favorites/:flat_id", delete(remove_favorite))
        .route("/:id", get(get_user))
        .route("/:id", delete(delete_user))
        .route("/:id/role", put(update_role))
}

#[derive(Debug, Deserialize)]
struct UserListQuery {
    role: Option<UserRole>,
    min_age: Option<i32>,
    max_age: Option<i32>,
    min_flats: Option<usize>,
    max_flats: Option<usize>,
    sort_by: Option<UserSortKey>,
    order: Option<SortOrder>,
    page: Option<usize>,
    per_page: Option<usize>,
}

/// 管理员用户列表
/// GET /api/users
async fn list_users(
    State(state): State<Arc<AppState>>,
    AdminAuth(_admin): AdminAuth,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Value>> {
    debug!("Fetching users list with query: {:?}", query);

    let filter = UserFilter {
        role: query.role,
        min_age: query.min_age,
        max_age: query.max_age,
        min_flats: query.min_flats,
        max_flats: query.max_flats,
    };

    let mut page = PageState::new(0, query.per_page.unwrap_or(state.get_page_size("users")));
    page.set_page(query.page.unwrap_or(0));

    let result = state
        .user_service
        .list_users(
            &filter,
            query.sort_by.unwrap_or_default(),
            query.order.unwrap_or_default(),
            &page,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "users": result.data,
            "pagination": {
                "page": result.page,
                "per_page": result.per_page,
                "total": result.total,
                "total_pages": result.total_pages,
            }
        }
    })))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    RequiredAuth(_viewer): RequiredAuth,
    Path(user_id): Path<String>,
) -> Result<Json<Value>> {
    let user = state
        .user_service
        .get_user(&user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(Json(json!({
        "success": true,
        "data": user
    })))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<Value>> {
    let updated = state.user_service.update_profile(&user.id, request).await?;

    // 资料变了，会话缓存里的旧数据作废
    state.auth_service.invalidate_session(&user.id).await;

    Ok(Json(json!({
        "success": true,
        "data": updated
    })))
}

async fn update_role(
    State(state): State<Arc<AppState>>,
    AdminAuth(_admin): AdminAuth,
    Path(user_id): Path<String>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<Value>> {
    let updated = state.user_service.update_role(&user_id, request.role).await?;
    state.auth_service.invalidate_session(&user_id).await;

    Ok(Json(json!({
        "success": true,
        "data": updated
    })))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    AdminAuth(_admin): AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<Value>> {
    state.user_service.delete_user(&user_id).await?;
    state.auth_service.invalidate_session(&user_id).await;
    state.notification_service.stop_feed(&user_id).await;

    Ok(Json(json!({
        "success": true,
        "message": "User deleted successfully"
    })))
}

async fn list_favorites(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
) -> Result<Json<Value>> {
    // 收藏集合可能被中间件缓存过，重新读一次最新的用户文档
    let fresh = state
        .user_service
        .get_user(&user.id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let flats = state.user_service.get_favorites(&fresh).await?;

    Ok(Json(json!({
        "success": true,
        "data": flats
    })))
}

async fn add_favorite(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Path(flat_id): Path<String>,
) -> Result<Json<Value>> {
    state.user_service.add_favorite(&user.id, &flat_id).await?;
    state.auth_service.invalidate_session(&user.id).await;

    Ok(Json(json!({
        "success": true,
        "message": "Flat added to favorites"
    })))
}

async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Path(flat_id): Path<String>,
) -> Result<Json<Value>> {
    state.user_service.remove_favorite(&user.id, &flat_id).await?;
    state.auth_service.invalidate_session(&user.id).await;

    Ok(Json(json!({
        "success": true,
        "message": "Flat removed from favorites"
    })))
}
