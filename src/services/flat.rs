use crate::{
    error::{AppError, Result},
    models::flat::*,
    models::user::User,
    services::database::{Database, PaginatedResult},
    services::{MediaService, NotificationService},
    utils::pagination::{paginate, PageState, SortOrder},
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct FlatService {
    db: Arc<Database>,
    media: MediaService,
    notifications: NotificationService,
}

impl FlatService {
    pub async fn new(
        db: Arc<Database>,
        media: MediaService,
        notifications: NotificationService,
    ) -> Result<Self> {
        Ok(Self {
            db,
            media,
            notifications,
        })
    }

    pub async fn create_flat(&self, owner: &User, request: CreateFlatRequest) -> Result<Flat> {
        request.validate().map_err(AppError::ValidatorError)?;

        let flat = Flat {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            city: capitalize_first(&request.city),
            country: capitalize_first(&request.country),
            street_name: request.street_name,
            street_number: request.street_number,
            area_size: request.area_size,
            has_ac: request.has_ac,
            year_built: request.year_built,
            rent_price: request.rent_price,
            date_available: request.date_available,
            description: request.description,
            image_uid: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let created: Flat = self.db.create("flat", flat).await?;
        info!("Created flat {} for owner {}", created.id, owner.id);

        // 名下房源变化，活跃的通知 feed 需要重建订阅
        self.notifications.rebuild_feed_if_active(&owner.id).await?;

        Ok(created)
    }

    pub async fn get_flat(&self, flat_id: &str) -> Result<Option<Flat>> {
        self.db.get_by_id("flat", flat_id).await
    }

    pub async fn get_flat_with_owner(
        &self,
        flat_id: &str,
        viewer: Option<&User>,
    ) -> Result<FlatWithOwner> {
        let flat: Flat = self
            .db
            .get_by_id("flat", flat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Flat"))?;

        let owner = self.owner_summary(&flat.owner_id).await?;
        Ok(self.with_display_fields(flat, owner, viewer))
    }

    pub async fn update_flat(
        &self,
        flat_id: &str,
        user: &User,
        request: UpdateFlatRequest,
    ) -> Result<Flat> {
        request.validate().map_err(AppError::ValidatorError)?;

        let flat: Flat = self
            .db
            .get_by_id("flat", flat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Flat"))?;

        if flat.owner_id != user.id {
            return Err(AppError::forbidden("You can only edit your own flats"));
        }

        let mut updates = serde_json::Map::new();
        if let Some(city) = request.city {
            updates.insert("city".to_string(), json!(capitalize_first(&city)));
        }
        if let Some(country) = request.country {
            updates.insert("country".to_string(), json!(capitalize_first(&country)));
        }
        if let Some(street_name) = request.street_name {
            updates.insert("street_name".to_string(), json!(street_name));
        }
        if let Some(street_number) = request.street_number {
            updates.insert("street_number".to_string(), json!(street_number));
        }
        if let Some(area_size) = request.area_size {
            updates.insert("area_size".to_string(), json!(area_size));
        }
        if let Some(has_ac) = request.has_ac {
            updates.insert("has_ac".to_string(), json!(has_ac));
        }
        if let Some(year_built) = request.year_built {
            updates.insert("year_built".to_string(), json!(year_built));
        }
        if let Some(rent_price) = request.rent_price {
            updates.insert("rent_price".to_string(), json!(rent_price));
        }
        if let Some(date_available) = request.date_available {
            updates.insert("date_available".to_string(), json!(date_available));
        }
        if let Some(description) = request.description {
            updates.insert("description".to_string(), json!(description));
        }
        updates.insert("updated_at".to_string(), json!(Utc::now()));

        let updated: Flat = self
            .db
            .update_by_id_with_json("flat", flat_id, Value::Object(updates))
            .await?
            .ok_or_else(|| AppError::internal("Failed to update flat"))?;

        Ok(updated)
    }

    /// 删除房源。历史遗留：消息子集合不做级联删除。
    pub async fn delete_flat(&self, flat_id: &str, user: &User) -> Result<()> {
        let flat: Flat = self
            .db
            .get_by_id("flat", flat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Flat"))?;

        if flat.owner_id != user.id {
            return Err(AppError::forbidden("You can only delete your own flats"));
        }

        self.db.delete_by_id("flat", flat_id).await?;
        info!("Deleted flat: {}", flat_id);

        self.notifications.rebuild_feed_if_active(&user.id).await?;

        Ok(())
    }

    pub async fn set_flat_image(
        &self,
        flat_id: &str,
        user: &User,
        request: SetFlatImageRequest,
    ) -> Result<Flat> {
        request.validate().map_err(AppError::ValidatorError)?;

        let flat: Flat = self
            .db
            .get_by_id("flat", flat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Flat"))?;

        if flat.owner_id != user.id {
            return Err(AppError::forbidden("You can only edit your own flats"));
        }

        let updates = json!({
            "image_uid": request.image_uid,
            "updated_at": Utc::now(),
        });

        let updated: Flat = self
            .db
            .update_by_id_with_json("flat", flat_id, updates)
            .await?
            .ok_or_else(|| AppError::internal("Failed to update flat image"))?;

        Ok(updated)
    }

    pub async fn get_flats_by_user(&self, owner_id: &str) -> Result<Vec<Flat>> {
        let query = r#"
            SELECT * FROM flat
            WHERE owner_id = $owner_id
            ORDER BY created_at DESC
        "#;
        let mut response = self
            .db
            .query_with_params(query, json!({ "owner_id": owner_id }))
            .await?;
        let flats: Vec<Flat> = response.take(0)?;
        Ok(flats)
    }

    /// 浏览房源：业主信息 + 收藏标记，过滤、排序、分页全在内存完成
    pub async fn browse_flats(
        &self,
        filter: &FlatFilter,
        sort_key: FlatSortKey,
        order: SortOrder,
        page: &PageState,
        viewer: Option<&User>,
    ) -> Result<PaginatedResult<FlatWithOwner>> {
        debug!("Browsing flats with filter: {:?}", filter);

        let flats: Vec<Flat> = self.db.select("flat").await?;

        // 每个业主只取一次
        let mut owners: HashMap<String, Option<FlatOwner>> = HashMap::new();
        for flat in &flats {
            if !owners.contains_key(&flat.owner_id) {
                let owner = self.owner_summary(&flat.owner_id).await?;
                owners.insert(flat.owner_id.clone(), owner);
            }
        }

        let mut entries: Vec<FlatWithOwner> = flats
            .into_iter()
            .filter(|flat| filter.matches(flat))
            .map(|flat| {
                let owner = owners.get(&flat.owner_id).cloned().flatten();
                self.with_display_fields(flat, owner, viewer)
            })
            .collect();

        sort_flats(&mut entries, sort_key, order);

        Ok(paginate(entries, page))
    }

    async fn owner_summary(&self, owner_id: &str) -> Result<Option<FlatOwner>> {
        let owner: Option<User> = self.db.get_by_id("user", owner_id).await?;
        Ok(owner.map(|user| FlatOwner {
            id: user.id.clone(),
            name: user.full_name(),
            email: user.email,
        }))
    }

    fn with_display_fields(
        &self,
        flat: Flat,
        owner: Option<FlatOwner>,
        viewer: Option<&User>,
    ) -> FlatWithOwner {
        let is_favorite = viewer
            .map(|u| u.favorites.iter().any(|id| id == &flat.id))
            .unwrap_or(false);
        let image_url = self.media.resolve(flat.image_uid.as_deref());

        FlatWithOwner {
            flat,
            owner,
            is_favorite,
            image_url,
        }
    }
}

/// 首字母大写，其余小写，与录入侧的城市/国家规范一致
fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_first_normalizes_case() {
        assert_eq!(capitalize_first("quito"), "Quito");
        assert_eq!(capitalize_first("GUAYAQUIL"), "Guayaquil");
        assert_eq!(capitalize_first(""), "");
    }
}
