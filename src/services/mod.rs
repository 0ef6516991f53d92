pub mod auth;
pub mod database;
pub mod flat;
pub mod media;
pub mod message;
pub mod notification;
pub mod user;

// 重新导出常用类型
pub use auth::AuthService;
pub use database::Database;
pub use flat::FlatService;
pub use media::MediaService;
pub use message::MessageService;
pub use notification::NotificationService;
pub use user::UserService;
