use crate::{
    error::{AppError, Result},
    models::flat::Flat,
    models::user::*,
    services::database::{Database, PaginatedResult},
    utils::pagination::{paginate, PageState, SortOrder},
    utils::validation,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

#[derive(Clone)]
pub struct UserService {
    db: Arc<Database>,
}

impl UserService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.db.get_by_id("user", user_id).await
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        request: UpdateProfileRequest,
    ) -> Result<User> {
        request.validate().map_err(AppError::ValidatorError)?;

        if let Some(birth_date) = request.birth_date {
            validation::validate_birth_date(birth_date, Utc::now().date_naive())?;
        }

        let existing: Option<User> = self.db.get_by_id("user", user_id).await?;
        if existing.is_none() {
            return Err(AppError::not_found("User"));
        }

        let mut updates = serde_json::Map::new();
        if let Some(first_name) = request.first_name {
            updates.insert("first_name".to_string(), json!(first_name));
        }
        if let Some(last_name) = request.last_name {
            updates.insert("last_name".to_string(), json!(last_name));
        }
        if let Some(birth_date) = request.birth_date {
            updates.insert("birth_date".to_string(), json!(birth_date));
        }
        if let Some(image_uid) = request.image_uid {
            updates.insert("image_uid".to_string(), json!(image_uid));
        }
        updates.insert("updated_at".to_string(), json!(Utc::now()));

        let updated: User = self
            .db
            .update_by_id_with_json("user", user_id, Value::Object(updates))
            .await?
            .ok_or_else(|| AppError::internal("Failed to update user"))?;

        Ok(updated)
    }

    /// 管理员用户表：带名下房源数量，内存中过滤、排序、分页
    pub async fn list_users(
        &self,
        filter: &UserFilter,
        sort_key: UserSortKey,
        order: SortOrder,
        page: &PageState,
    ) -> Result<PaginatedResult<UserWithFlatCount>> {
        debug!("Listing users with filter: {:?}", filter);

        let users: Vec<User> = self.db.select("user").await?;
        let counts = self.flat_counts_by_owner().await?;

        let today = Utc::now().date_naive();
        let mut entries: Vec<UserWithFlatCount> = users
            .into_iter()
            .map(|user| {
                let flat_count = counts.get(&user.id).copied().unwrap_or(0);
                UserWithFlatCount { user, flat_count }
            })
            .filter(|entry| filter.matches(entry, today))
            .collect();

        sort_users(&mut entries, sort_key, order);

        Ok(paginate(entries, page))
    }

    pub async fn update_role(&self, user_id: &str, role: UserRole) -> Result<User> {
        let existing: Option<User> = self.db.get_by_id("user", user_id).await?;
        if existing.is_none() {
            return Err(AppError::not_found("User"));
        }

        let updates = json!({
            "role": role,
            "updated_at": Utc::now(),
        });

        let updated: User = self
            .db
            .update_by_id_with_json("user", user_id, updates)
            .await?
            .ok_or_else(|| AppError::internal("Failed to update user role"))?;

        info!("Updated role of user {} to {}", user_id, role.as_str());
        Ok(updated)
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let existing: Option<User> = self.db.get_by_id("user", user_id).await?;
        if existing.is_none() {
            return Err(AppError::not_found("User"));
        }

        self.db.delete_by_id("user", user_id).await?;
        info!("Deleted user: {}", user_id);
        Ok(())
    }

    /// 收藏集合的写入走 set 语义，避免整文档覆盖并发收藏
    pub async fn add_favorite(&self, user_id: &str, flat_id: &str) -> Result<()> {
        let flat: Option<Flat> = self.db.get_by_id("flat", flat_id).await?;
        if flat.is_none() {
            return Err(AppError::not_found("Flat"));
        }

        let query = format!(
            "UPDATE user:`{}` SET favorites = array::union(favorites, [$flat_id]), updated_at = time::now()",
            pure_id(user_id)
        );
        self.db
            .query_with_params(&query, json!({ "flat_id": flat_id }))
            .await?;

        debug!("User {} added flat {} to favorites", user_id, flat_id);
        Ok(())
    }

    pub async fn remove_favorite(&self, user_id: &str, flat_id: &str) -> Result<()> {
        let query = format!(
            "UPDATE user:`{}` SET favorites = array::difference(favorites, [$flat_id]), updated_at = time::now()",
            pure_id(user_id)
        );
        self.db
            .query_with_params(&query, json!({ "flat_id": flat_id }))
            .await?;

        debug!("User {} removed flat {} from favorites", user_id, flat_id);
        Ok(())
    }

    /// 解析收藏的房源，悬空的收藏ID直接丢弃
    pub async fn get_favorites(&self, user: &User) -> Result<Vec<Flat>> {
        let mut flats = Vec::new();
        for flat_id in &user.favorites {
            match self.db.get_by_id::<Flat>("flat", flat_id).await? {
                Some(flat) => flats.push(flat),
                None => debug!("Dropping dangling favorite {} of user {}", flat_id, user.id),
            }
        }
        Ok(flats)
    }

    async fn flat_counts_by_owner(&self) -> Result<HashMap<String, usize>> {
        #[derive(Debug, Deserialize)]
        struct OwnerRow {
            owner_id: String,
        }

        let mut response = self.db.query("SELECT owner_id FROM flat").await?;
        let rows: Vec<OwnerRow> = response.take(0)?;

        let mut counts = HashMap::new();
        for row in rows {
            *counts.entry(row.owner_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

fn pure_id(id: &str) -> &str {
    id.strip_prefix("user:").unwrap_or(id)
}
