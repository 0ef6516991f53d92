use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::pagination::{cmp_str, SortOrder};
use crate::utils::validation::age_on;

/// 用户角色，与存量数据保持一致使用西语值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Usuario,
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Usuario
    }
}

impl UserRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usuario => "usuario",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: UserRole,
    pub birth_date: Option<NaiveDate>,
    pub image_uid: Option<String>,
    /// 收藏的房源ID集合（去重，无序）
    #[serde(default)]
    pub favorites: Vec<String>,
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// 评估时刻的年龄；缺少出生日期时按 0 处理
    pub fn age(&self, today: NaiveDate) -> i32 {
        self.birth_date.map(|b| age_on(b, today)).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 6, max = 128))]
    pub password: String,

    pub confirm_password: String,

    #[validate(length(min = 2, max = 50))]
    pub first_name: String,

    #[validate(length(min = 2, max = 50))]
    pub last_name: String,

    pub birth_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 50))]
    pub first_name: Option<String>,

    #[validate(length(min = 2, max = 50))]
    pub last_name: Option<String>,

    pub birth_date: Option<NaiveDate>,

    #[validate(length(min = 1, max = 500))]
    pub image_uid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

/// 管理员用户列表行：用户信息加上名下房源数量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWithFlatCount {
    #[serde(flatten)]
    pub user: User,
    pub flat_count: usize,
}

/// 用户表过滤条件，空条件恒为真
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    pub min_flats: Option<usize>,
    pub max_flats: Option<usize>,
}

impl UserFilter {
    pub fn matches(&self, entry: &UserWithFlatCount, today: NaiveDate) -> bool {
        let role_ok = self.role.map_or(true, |r| entry.user.role == r);
        let age = entry.user.age(today);
        let age_ok = self.min_age.map_or(true, |min| age >= min)
            && self.max_age.map_or(true, |max| age <= max);
        let flats_ok = self.min_flats.map_or(true, |min| entry.flat_count >= min)
            && self.max_flats.map_or(true, |max| entry.flat_count <= max);
        role_ok && age_ok && flats_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSortKey {
    FirstName,
    LastName,
    Email,
    Role,
    FlatCount,
}

impl Default for UserSortKey {
    fn default() -> Self {
        Self::LastName
    }
}

pub fn sort_users(entries: &mut [UserWithFlatCount], key: UserSortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        let ord = match key {
            UserSortKey::FirstName => cmp_str(&a.user.first_name, &b.user.first_name),
            UserSortKey::LastName => cmp_str(&a.user.last_name, &b.user.last_name),
            UserSortKey::Email => cmp_str(&a.user.email, &b.user.email),
            UserSortKey::Role => cmp_str(a.user.role.as_str(), b.user.role.as_str()),
            UserSortKey::FlatCount => a.flat_count.cmp(&b.flat_count),
        };
        order.apply(ord)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::pagination::SortState;

    fn entry(first: &str, last: &str, birth: Option<NaiveDate>, flats: usize, role: UserRole) -> UserWithFlatCount {
        UserWithFlatCount {
            user: User {
                id: format!("user-{}", last.to_lowercase()),
                email: format!("{}@example.com", last.to_lowercase()),
                first_name: first.to_string(),
                last_name: last.to_string(),
                role,
                birth_date: birth,
                image_uid: None,
                favorites: Vec::new(),
                password_hash: String::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            flat_count: flats,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
    }

    #[test]
    fn sort_by_last_name_asc_then_toggle() {
        let mut entries = vec![
            entry("Ana", "Perez", None, 0, UserRole::Usuario),
            entry("Luis", "Alvarez", None, 0, UserRole::Usuario),
        ];
        let mut sort = SortState::new(UserSortKey::LastName);

        sort_users(&mut entries, sort.key, sort.order);
        assert_eq!(entries[0].user.last_name, "Alvarez");
        assert_eq!(entries[1].user.last_name, "Perez");

        // 再次点击同一列翻转方向
        sort.request(UserSortKey::LastName);
        sort_users(&mut entries, sort.key, sort.order);
        assert_eq!(entries[0].user.last_name, "Perez");
        assert_eq!(entries[1].user.last_name, "Alvarez");
    }

    #[test]
    fn selecting_new_key_resets_to_ascending() {
        let mut sort = SortState::new(UserSortKey::LastName);
        sort.request(UserSortKey::LastName);
        assert_eq!(sort.order, SortOrder::Desc);

        sort.request(UserSortKey::FlatCount);
        assert_eq!(sort.key, UserSortKey::FlatCount);
        assert_eq!(sort.order, SortOrder::Asc);
    }

    #[test]
    fn flat_count_sorts_numerically() {
        let mut entries = vec![
            entry("A", "Two", None, 10, UserRole::Usuario),
            entry("B", "One", None, 2, UserRole::Usuario),
        ];
        sort_users(&mut entries, UserSortKey::FlatCount, SortOrder::Asc);
        assert_eq!(entries[0].flat_count, 2);
        assert_eq!(entries[1].flat_count, 10);
    }

    #[test]
    fn age_filter_excludes_minor() {
        // 17 岁在 min=18 时被排除
        let minor = entry(
            "Teo",
            "Joven",
            NaiveDate::from_ymd_opt(2009, 1, 1),
            0,
            UserRole::Usuario,
        );
        let adult = entry(
            "Eva",
            "Mayor",
            NaiveDate::from_ymd_opt(1990, 1, 1),
            0,
            UserRole::Usuario,
        );
        let filter = UserFilter {
            min_age: Some(18),
            ..Default::default()
        };
        assert!(!filter.matches(&minor, today()));
        assert!(filter.matches(&adult, today()));
    }

    #[test]
    fn role_and_flat_range_filters() {
        let admin = entry("Ada", "Root", None, 3, UserRole::Admin);
        let plain = entry("Bo", "Plain", None, 7, UserRole::Usuario);

        let by_role = UserFilter {
            role: Some(UserRole::Admin),
            ..Default::default()
        };
        assert!(by_role.matches(&admin, today()));
        assert!(!by_role.matches(&plain, today()));

        let by_flats = UserFilter {
            min_flats: Some(1),
            max_flats: Some(5),
            ..Default::default()
        };
        assert!(by_flats.matches(&admin, today()));
        assert!(!by_flats.matches(&plain, today()));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = UserFilter::default();
        assert!(filter.matches(&entry("X", "Y", None, 0, UserRole::Usuario), today()));
    }
}
