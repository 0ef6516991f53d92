use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::services::database::PaginatedResult;

/// 表格允许的固定每页条数
pub const PAGE_SIZES: [usize; 4] = [5, 10, 25, 50];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Asc
    }
}

impl SortOrder {
    pub fn flip(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Self::Asc => ord,
            Self::Desc => ord.reverse(),
        }
    }
}

/// 单一生效排序键：同键再次请求翻转方向，换键重置为升序
#[derive(Debug, Clone, Copy)]
pub struct SortState<K: Copy + PartialEq> {
    pub key: K,
    pub order: SortOrder,
}

impl<K: Copy + PartialEq> SortState<K> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            order: SortOrder::Asc,
        }
    }

    pub fn request(&mut self, key: K) {
        if self.key == key {
            self.order = self.order.flip();
        } else {
            self.key = key;
            self.order = SortOrder::Asc;
        }
    }
}

/// 分页状态；切换每页条数时回到第 0 页
#[derive(Debug, Clone, Copy)]
pub struct PageState {
    pub page: usize,
    pub per_page: usize,
}

impl PageState {
    pub fn new(page: usize, per_page: usize) -> Self {
        let per_page = if PAGE_SIZES.contains(&per_page) {
            per_page
        } else {
            PAGE_SIZES[1]
        };
        Self { page, per_page }
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
    }

    pub fn set_per_page(&mut self, per_page: usize) {
        if !PAGE_SIZES.contains(&per_page) {
            return;
        }
        self.per_page = per_page;
        self.page = 0;
    }
}

/// 不区分大小写的字符串排序（localeCompare 的近似）
pub fn cmp_str(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// 切片严格发生在过滤与排序之后
pub fn paginate<T>(items: Vec<T>, page: &PageState) -> PaginatedResult<T> {
    let total = items.len();
    let per_page = page.per_page.max(1);
    let total_pages = (total + per_page - 1) / per_page;
    let data = items
        .into_iter()
        .skip(page.page * per_page)
        .take(per_page)
        .collect();

    PaginatedResult {
        data,
        total,
        page: page.page,
        per_page,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_flips_new_key_resets() {
        let mut sort = SortState::new("last_name");
        assert_eq!(sort.order, SortOrder::Asc);

        sort.request("last_name");
        assert_eq!(sort.order, SortOrder::Desc);

        sort.request("email");
        assert_eq!(sort.key, "email");
        assert_eq!(sort.order, SortOrder::Asc);
    }

    #[test]
    fn changing_page_size_resets_page() {
        let mut page = PageState::new(3, 10);
        page.set_per_page(25);
        assert_eq!(page.per_page, 25);
        assert_eq!(page.page, 0);
    }

    #[test]
    fn unknown_page_size_is_ignored() {
        let mut page = PageState::new(2, 10);
        page.set_per_page(7);
        assert_eq!(page.per_page, 10);
        assert_eq!(page.page, 2);
    }

    #[test]
    fn pagination_slices_after_the_fact() {
        let items: Vec<i32> = (0..23).collect();
        let result = paginate(items, &PageState::new(2, 10));
        assert_eq!(result.data, vec![20, 21, 22]);
        assert_eq!(result.total, 23);
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.page, 2);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let items: Vec<i32> = (0..5).collect();
        let result = paginate(items, &PageState::new(4, 5));
        assert!(result.data.is_empty());
        assert_eq!(result.total, 5);
    }

    #[test]
    fn case_insensitive_string_ordering() {
        assert_eq!(cmp_str("alvarez", "Perez"), Ordering::Less);
        assert_eq!(cmp_str("Perez", "perez"), Ordering::Equal);
    }
}
