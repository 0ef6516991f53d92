use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // Database configuration
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Authentication configuration
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub session_cache_ttl: u64,

    // Storage configuration
    pub storage_base_url: String,

    // Content settings
    pub max_message_length: usize,
    pub max_description_length: usize,
    pub default_flats_per_page: usize,
    pub default_users_per_page: usize,

    // Notification settings
    pub notification_feed_limit: usize,
    pub feed_sweep_interval: u64,

    // Feature flags
    pub enable_registrations: bool,
    pub enable_messages: bool,

    // Rate limiting
    pub rate_limit_requests: u32,
    pub rate_limit_window: u64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "rainbow".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "flats".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "168".to_string())
                .parse()?,
            session_cache_ttl: env::var("SESSION_CACHE_TTL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            storage_base_url: env::var("STORAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000/flatfinder".to_string()),

            max_message_length: env::var("MAX_MESSAGE_LENGTH")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()?,
            max_description_length: env::var("MAX_DESCRIPTION_LENGTH")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            default_flats_per_page: env::var("DEFAULT_FLATS_PER_PAGE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            default_users_per_page: env::var("DEFAULT_USERS_PER_PAGE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            notification_feed_limit: env::var("NOTIFICATION_FEED_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            feed_sweep_interval: env::var("FEED_SWEEP_INTERVAL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            enable_registrations: env::var("ENABLE_REGISTRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            enable_messages: env::var("ENABLE_MESSAGES")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            rate_limit_window: env::var("RATE_LIMIT_WINDOW")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}
