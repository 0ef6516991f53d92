use crate::{
    config::Config,
    error::{AppError, Result},
    models::user::{LoginRequest, RegisterRequest, User, UserRole},
    services::Database,
    utils::validation,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct AuthService {
    config: Config,
    db: Arc<Database>,
    user_cache: Arc<RwLock<HashMap<String, CachedUser>>>,
}

#[derive(Debug, Clone)]
struct CachedUser {
    user: User,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // 用户ID
    pub exp: i64,           // 过期时间
    pub iat: i64,           // 签发时间
    pub email: Option<String>,
}

impl AuthService {
    pub async fn new(db: Arc<Database>, config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            db,
            user_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// 注册新用户，邮箱唯一，密码经 argon2 哈希后存储
    pub async fn register(&self, request: RegisterRequest) -> Result<User> {
        request.validate().map_err(AppError::ValidatorError)?;
        validation::validate_email_format(&request.email)?;

        if request.password != request.confirm_password {
            return Err(AppError::validation("Passwords do not match"));
        }

        validation::validate_birth_date(request.birth_date, Utc::now().date_naive())?;

        let existing: Option<User> = self.db.find_one("user", "email", &request.email).await?;
        if existing.is_some() {
            return Err(AppError::conflict("Email is already registered"));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            role: UserRole::Usuario,
            birth_date: Some(request.birth_date),
            image_uid: None,
            favorites: Vec::new(),
            password_hash: hash_password(&request.password)?,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let created: User = self.db.create("user", user).await?;
        info!("Registered user: {} ({})", created.id, created.email);

        Ok(created)
    }

    /// 登录：校验口令并签发 JWT
    pub async fn login(&self, request: LoginRequest) -> Result<(User, String)> {
        request.validate().map_err(AppError::ValidatorError)?;

        let user: User = self
            .db
            .find_one("user", "email", &request.email)
            .await?
            .ok_or_else(|| AppError::unauthorized("Invalid email or password"))?;

        if !verify_password(&request.password, &user.password_hash)? {
            return Err(AppError::unauthorized("Invalid email or password"));
        }

        let token = self.issue_jwt(&user)?;
        self.cache_user(user.clone()).await;
        debug!("User logged in: {}", user.id);

        Ok((user, token))
    }

    pub fn issue_jwt(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            exp: (now + Duration::hours(self.config.jwt_expiry_hours)).timestamp(),
            iat: now.timestamp(),
            email: Some(user.email.clone()),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_ref()),
        )?;
        Ok(token)
    }

    pub fn verify_jwt(&self, token: &str) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.config.jwt_secret.as_ref());
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(token_data) => {
                debug!("JWT token verified for user: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::Authentication("Invalid token".to_string()))
            }
        }
    }

    /// 解析会话用户，短TTL缓存避免每个请求都查库
    pub async fn get_session_user(&self, user_id: &str) -> Result<Option<User>> {
        {
            let cache = self.user_cache.read().await;
            if let Some(cached) = cache.get(user_id) {
                if cached.expires_at > Utc::now() {
                    return Ok(Some(cached.user.clone()));
                }
            }
        }

        let user: Option<User> = self.db.get_by_id("user", user_id).await?;
        if let Some(ref user) = user {
            self.cache_user(user.clone()).await;
        }
        Ok(user)
    }

    /// 用户资料变更或登出后使缓存失效
    pub async fn invalidate_session(&self, user_id: &str) {
        self.user_cache.write().await.remove(user_id);
    }

    /// 清理过期会话缓存
    pub async fn cleanup_expired_sessions(&self) -> Result<()> {
        let now = Utc::now();
        let mut cache = self.user_cache.write().await;
        let before = cache.len();
        cache.retain(|_, cached| cached.expires_at > now);
        if cache.len() < before {
            debug!("Evicted {} expired session entries", before - cache.len());
        }
        Ok(())
    }

    async fn cache_user(&self, user: User) {
        let expires_at = Utc::now() + Duration::seconds(self.config.session_cache_ttl as i64);
        self.user_cache
            .write()
            .await
            .insert(user.id.clone(), CachedUser { user, expires_at });
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter42").unwrap();
        assert!(verify_password("hunter42", &hash).unwrap());
        assert!(!verify_password("hunter43", &hash).unwrap());
    }

    #[test]
    fn invalid_stored_hash_is_an_error() {
        assert!(verify_password("whatever", "not-a-phc-string").is_err());
    }
}
