use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::pagination::{cmp_str, SortOrder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flat {
    pub id: String,
    pub owner_id: String,
    pub city: String,
    pub country: String,
    pub street_name: String,
    pub street_number: String,
    pub area_size: f64,
    pub has_ac: bool,
    pub year_built: i32,
    pub rent_price: f64,
    pub date_available: Option<NaiveDate>,
    pub description: Option<String>,
    /// 存储路径或历史遗留的绝对URL，展示前经 MediaService 解析
    pub image_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 房源的业主摘要，浏览列表里与房源一起返回
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatOwner {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatWithOwner {
    #[serde(flatten)]
    pub flat: Flat,
    pub owner: Option<FlatOwner>,
    pub is_favorite: bool,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateFlatRequest {
    #[validate(length(min = 1, max = 60))]
    pub city: String,

    #[validate(length(min = 1, max = 60))]
    pub country: String,

    #[validate(length(min = 1, max = 120))]
    pub street_name: String,

    #[validate(length(min = 1, max = 20))]
    pub street_number: String,

    #[validate(range(min = 1.0))]
    pub area_size: f64,

    #[serde(default)]
    pub has_ac: bool,

    #[validate(range(min = 1800, max = 2100))]
    pub year_built: i32,

    #[validate(range(min = 0.0))]
    pub rent_price: f64,

    pub date_available: Option<NaiveDate>,

    #[validate(length(max = 5000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateFlatRequest {
    #[validate(length(min = 1, max = 60))]
    pub city: Option<String>,

    #[validate(length(min = 1, max = 60))]
    pub country: Option<String>,

    #[validate(length(min = 1, max = 120))]
    pub street_name: Option<String>,

    #[validate(length(min = 1, max = 20))]
    pub street_number: Option<String>,

    #[validate(range(min = 1.0))]
    pub area_size: Option<f64>,

    pub has_ac: Option<bool>,

    #[validate(range(min = 1800, max = 2100))]
    pub year_built: Option<i32>,

    #[validate(range(min = 0.0))]
    pub rent_price: Option<f64>,

    pub date_available: Option<NaiveDate>,

    #[validate(length(max = 5000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetFlatImageRequest {
    #[validate(length(min = 1, max = 500))]
    pub image_uid: String,
}

/// 房源过滤条件：城市精确匹配、租金上限、面积下限，空条件恒为真
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlatFilter {
    pub city: Option<String>,
    pub max_price: Option<f64>,
    pub min_area: Option<f64>,
}

impl FlatFilter {
    pub fn matches(&self, flat: &Flat) -> bool {
        let city_ok = self
            .city
            .as_deref()
            .map_or(true, |c| c.is_empty() || flat.city == c);
        let price_ok = self.max_price.map_or(true, |max| flat.rent_price <= max);
        let area_ok = self.min_area.map_or(true, |min| flat.area_size >= min);
        city_ok && price_ok && area_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlatSortKey {
    City,
    RentPrice,
    AreaSize,
    CreatedAt,
}

impl Default for FlatSortKey {
    fn default() -> Self {
        Self::CreatedAt
    }
}

pub fn sort_flats(entries: &mut [FlatWithOwner], key: FlatSortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        let ord = match key {
            FlatSortKey::City => cmp_str(&a.flat.city, &b.flat.city),
            FlatSortKey::RentPrice => a
                .flat
                .rent_price
                .partial_cmp(&b.flat.rent_price)
                .unwrap_or(std::cmp::Ordering::Equal),
            FlatSortKey::AreaSize => a
                .flat
                .area_size
                .partial_cmp(&b.flat.area_size)
                .unwrap_or(std::cmp::Ordering::Equal),
            FlatSortKey::CreatedAt => a.flat.created_at.cmp(&b.flat.created_at),
        };
        order.apply(ord)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(city: &str, rent_price: f64, area_size: f64) -> Flat {
        Flat {
            id: format!("flat-{}", city.to_lowercase()),
            owner_id: "owner-1".to_string(),
            city: city.to_string(),
            country: "Ecuador".to_string(),
            street_name: "Av. Amazonas".to_string(),
            street_number: "12".to_string(),
            area_size,
            has_ac: false,
            year_built: 2005,
            rent_price,
            date_available: None,
            description: None,
            image_uid: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn city_filter_is_exact() {
        let quito = flat("Quito", 500.0, 40.0);
        let loja = flat("Loja", 300.0, 60.0);

        let filter = FlatFilter {
            city: Some("Quito".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&quito));
        assert!(!filter.matches(&loja));
    }

    #[test]
    fn price_ceiling_filter() {
        let quito = flat("Quito", 500.0, 40.0);
        let loja = flat("Loja", 300.0, 60.0);

        let filter = FlatFilter {
            max_price: Some(400.0),
            ..Default::default()
        };
        assert!(!filter.matches(&quito));
        assert!(filter.matches(&loja));
    }

    #[test]
    fn area_floor_filter() {
        let quito = flat("Quito", 500.0, 40.0);
        let loja = flat("Loja", 300.0, 60.0);

        let filter = FlatFilter {
            min_area: Some(50.0),
            ..Default::default()
        };
        assert!(!filter.matches(&quito));
        assert!(filter.matches(&loja));
    }

    #[test]
    fn empty_criteria_match_everything() {
        let filter = FlatFilter {
            city: Some(String::new()),
            ..Default::default()
        };
        assert!(filter.matches(&flat("Quito", 500.0, 40.0)));
        assert!(filter.matches(&flat("Loja", 300.0, 60.0)));
    }

    #[test]
    fn all_criteria_must_hold() {
        let filter = FlatFilter {
            city: Some("Quito".to_string()),
            max_price: Some(400.0),
            min_area: None,
        };
        // 城市匹配但超出租金上限
        assert!(!filter.matches(&flat("Quito", 500.0, 40.0)));
    }
}
