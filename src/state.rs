use crate::{
    config::Config,
    services::{
        auth::AuthService,
        database::Database,
        flat::FlatService,
        media::MediaService,
        message::MessageService,
        notification::NotificationService,
        user::UserService,
    },
};

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 数据库连接
    pub db: Database,

    /// 认证服务
    pub auth_service: AuthService,

    /// 用户服务
    pub user_service: UserService,

    /// 房源服务
    pub flat_service: FlatService,

    /// 消息服务
    pub message_service: MessageService,

    /// 通知聚合服务
    pub notification_service: NotificationService,

    /// 媒体服务
    pub media_service: MediaService,
}

impl AppState {
    /// 检查功能是否启用
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        match feature {
            "registrations" => self.config.enable_registrations,
            "messages" => self.config.enable_messages,
            _ => false,
        }
    }

    /// 获取分页配置
    pub fn get_page_size(&self, resource_type: &str) -> usize {
        match resource_type {
            "flats" => self.config.default_flats_per_page,
            "users" => self.config.default_users_per_page,
            _ => 10,
        }
    }

    /// 检查是否为生产环境
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// 检查是否为开发环境
    pub fn is_development(&self) -> bool {
        self.config.is_development()
    }
}
