use crate::{
    error::Result,
    models::flat::*,
    state::AppState,
    utils::middleware::{OptionalAuth, RequiredAuth},
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

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(browse_flats))
        .route("/", post(create_flat))
        .route("/mine", get(my_flats))
        .route("/:id", get(get_flat))
        .route("/:id", put(update_flat))
        .route("/:id", delete(delete_flat))
        .route("/:id/image", post(set_flat_image))
}

#[derive(Debug, Deserialize)]
struct BrowseFlatsQuery {
    city: Option<String>,
    max_price: Option<f64>,
    min_area: Option<f64>,
    sort_by: Option<FlatSortKey>,
    order: Option<SortOrder>,
    page: Option<usize>,
    per_page: Option<usize>,
}

async fn browse_flats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseFlatsQuery>,
    OptionalAuth(user): OptionalAuth,
) -> Result<Json<Value>> {
    let filter = FlatFilter {
        city: query.city,
        max_price: query.max_price,
        min_area: query.min_area,
    };

    let mut page = PageState::new(0, query.per_page.unwrap_or(state.get_page_size("flats")));
    page.set_page(query.page.unwrap_or(0));

    let result = state
        .flat_service
        .browse_flats(
            &filter,
            query.sort_by.unwrap_or_default(),
            query.order.unwrap_or_default(),
            &page,
            user.as_ref(),
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "flats": result.data,
            "pagination": {
                "page": result.page,
                "per_page": result.per_page,
                "total": result.total,
                "total_pages": result.total_pages,
            }
        }
    })))
}

async fn create_flat(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Json(request): Json<CreateFlatRequest>,
) -> Result<Json<Value>> {
    let flat = state.flat_service.create_flat(&user, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": flat
    })))
}

async fn my_flats(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
) -> Result<Json<Value>> {
    let flats = state.flat_service.get_flats_by_user(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": flats
    })))
}

async fn get_flat(
    State(state): State<Arc<AppState>>,
    Path(flat_id): Path<String>,
    OptionalAuth(user): OptionalAuth,
) -> Result<Json<Value>> {
    let flat = state
        .flat_service
        .get_flat_with_owner(&flat_id, user.as_ref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": flat
    })))
}

async fn update_flat(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Path(flat_id): Path<String>,
    Json(request): Json<UpdateFlatRequest>,
) -> Result<Json<Value>> {
    let flat = state.flat_service.update_flat(&flat_id, &user, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": flat
    })))
}

async fn delete_flat(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Path(flat_id): Path<String>,
) -> Result<Json<Value>> {
    state.flat_service.delete_flat(&flat_id, &user).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Flat deleted successfully"
    })))
}

async fn set_flat_image(
    State(state): State<Arc<AppState>>,
    RequiredAuth(user): RequiredAuth,
    Path(flat_id): Path<String>,
    Json(request): Json<SetFlatImageRequest>,
) -> Result<Json<Value>> {
    let flat = state
        .flat_service
        .set_flat_image(&flat_id, &user, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": flat
    })))
}
