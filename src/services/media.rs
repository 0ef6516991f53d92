use crate::{config::Config, error::Result};

/// 图片引用解析统一走这里：历史数据里存的是绝对URL，
/// 新数据存相对的存储路径，消费方不再自行分辨两种格式。
#[derive(Clone)]
pub struct MediaService {
    config: Config,
}

impl MediaService {
    pub async fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }

    /// resolve(imageRef) -> URL；已是绝对URL的引用原样返回
    pub fn resolve(&self, image_ref: Option<&str>) -> Option<String> {
        let image_ref = image_ref?;
        if image_ref.is_empty() {
            return None;
        }

        if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
            return Some(image_ref.to_string());
        }

        Some(format!(
            "{}/{}",
            self.config.storage_base_url.trim_end_matches('/'),
            image_ref.trim_start_matches('/')
        ))
    }

    /// 存储路径约定：<scope>Images/<ownerId>/<fileName>
    pub fn storage_path(&self, scope: &str, owner_id: &str, file_name: &str) -> String {
        format!("{}Images/{}/{}", scope, owner_id, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MediaService {
        let mut config = test_config();
        config.storage_base_url = "http://storage.local/flatfinder/".to_string();
        MediaService { config }
    }

    fn test_config() -> Config {
        std::env::set_var("JWT_SECRET", "test-secret");
        Config::from_env().unwrap()
    }

    #[test]
    fn absolute_urls_pass_through() {
        let media = service();
        assert_eq!(
            media.resolve(Some("https://cdn.example.com/a.png")).as_deref(),
            Some("https://cdn.example.com/a.png")
        );
    }

    #[test]
    fn storage_paths_join_base_url() {
        let media = service();
        assert_eq!(
            media.resolve(Some("userImages/u1/avatar.png")).as_deref(),
            Some("http://storage.local/flatfinder/userImages/u1/avatar.png")
        );
    }

    #[test]
    fn missing_and_empty_refs_resolve_to_none() {
        let media = service();
        assert_eq!(media.resolve(None), None);
        assert_eq!(media.resolve(Some("")), None);
    }

    #[test]
    fn storage_path_convention() {
        let media = service();
        assert_eq!(
            media.storage_path("user", "u1", "cara.png"),
            "userImages/u1/cara.png"
        );
    }
}
