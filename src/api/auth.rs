//! Registration, login, and token handling.
//!
//! Passwords are hashed with Argon2 exactly once, at creation; an account
//! update re-hashes only when a new plaintext arrives. Bearer tokens are
//! HS256 JWTs carrying the user id, expiring after the configured TTL.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{
    now_timestamp, AuthResponse, DbPool, LoginRequest, RegisterRequest, Role, User, UserResponse,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::Json;
use super::validation;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id
    sub: i64,
    exp: u64,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!("Failed to hash password: {}", e);
            ApiError::internal("Failed to process credentials")
        })
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Issue a bearer token for a user
pub fn issue_token(secret: &str, ttl_hours: u64, user_id: i64) -> Result<String, ApiError> {
    let exp = chrono::Utc::now()
        .timestamp()
        .saturating_add(ttl_hours as i64 * 3600) as u64;
    let claims = Claims { sub: user_id, exp };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("Failed to sign token: {}", e);
        ApiError::internal("Failed to issue token")
    })
}

/// Decode a bearer token, returning the user id it was issued for.
/// Expired or tampered tokens are rejected here by the JWT validation.
pub fn decode_token(secret: &str, token: &str) -> Result<i64, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|_| ApiError::unauthenticated("Invalid or expired token"))
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

fn validate_register(req: &RegisterRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validation::validate_name(&req.first_name, "First name") {
        errors.add("firstName", e);
    }
    if let Err(e) = validation::validate_name(&req.last_name, "Last name") {
        errors.add("lastName", e);
    }
    if let Err(e) = validation::validate_email(&req.email) {
        errors.add("email", e);
    }
    if req.password.is_empty() {
        errors.add("password", "Password is required");
    }

    errors.finish()
}

/// Register a new account. The role defaults to CUSTOMER when absent.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    validate_register(&req)?;

    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&req.email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("User with this email already exists"));
    }

    let role = req.role.unwrap_or(Role::Customer);
    let password_hash = hash_password(&req.password)?;
    let now = now_timestamp();

    let insert = sqlx::query(
        "INSERT INTO users (first_name, last_name, email, password_hash, role, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(role.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await;

    // The unique email constraint is the last word on concurrent registration.
    let id = match insert {
        Ok(result) => result.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE constraint failed") => {
            return Err(ApiError::conflict("User with this email already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(email = %user.email, role = %user.role, "Registered new user");

    let token = issue_token(&state.config.auth.jwt_secret, state.config.auth.token_ttl_hours, id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserResponse::from(user),
            token,
        }),
    ))
}

/// Login endpoint. The error is the same whichever credential was wrong, so
/// accounts cannot be enumerated.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&req.email)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthenticated("Invalid email or password"))?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::unauthenticated("Invalid email or password"));
    }

    let token = issue_token(
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_hours,
        user.id,
    )?;
    Ok(Json(AuthResponse {
        user: UserResponse::from(user),
        token,
    }))
}

/// Current-user endpoint: 401 for a missing/invalid/expired token, 404 when
/// the token's subject no longer exists.
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, ApiError> {
    let token = extract_bearer(&headers)
        .ok_or_else(|| ApiError::unauthenticated("Authorization header missing"))?;
    let user_id = decode_token(&state.config.auth.jwt_secret, token)?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;

    user.map(|u| Json(UserResponse::from(u)))
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Extractor for the authenticated user behind the protected routes.
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer(&parts.headers)
            .ok_or_else(|| ApiError::unauthenticated("Authorization header missing"))?;
        let user_id = decode_token(&state.config.auth.jwt_secret, token)?;

        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::unauthenticated("Invalid or expired token"))
    }
}

/// Seed the initial ADMIN account from config when none exists yet.
pub async fn ensure_admin_user(pool: &DbPool, email: &str, password: &str) -> anyhow::Result<()> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'ADMIN'")
        .fetch_one(pool)
        .await?;
    if count.0 > 0 {
        return Ok(());
    }

    if password.is_empty() {
        tracing::warn!("No admin account exists and auth.admin_password is unset; skipping seed");
        return Ok(());
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("hashing admin password: {}", e))?;
    let now = now_timestamp();
    sqlx::query(
        "INSERT INTO users (first_name, last_name, email, password_hash, role, created_at, updated_at)
         VALUES ('Clinic', 'Admin', ?, ?, 'ADMIN', ?, ?)",
    )
    .bind(email)
    .bind(&password_hash)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    tracing::info!(email = %email, "Created initial admin user");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2!correct").unwrap();
        assert!(verify_password("hunter2!correct", &hash));
        assert!(!verify_password("hunter2!wrong", &hash));
        assert!(!verify_password("hunter2!correct", "not-a-hash"));
    }

    #[test]
    fn token_round_trip() {
        let token = issue_token("test-secret", 24, 42).unwrap();
        assert_eq!(decode_token("test-secret", &token).unwrap(), 42);
    }

    #[test]
    fn token_rejects_wrong_secret_and_garbage() {
        let token = issue_token("test-secret", 24, 42).unwrap();
        assert!(decode_token("other-secret", &token).is_err());
        assert!(decode_token("test-secret", "garbage").is_err());
    }

    #[tokio::test]
    async fn admin_seed_is_idempotent() {
        let pool = crate::db::test_support::pool().await;

        ensure_admin_user(&pool, "admin@clinic.test", "s3cret").await.unwrap();
        ensure_admin_user(&pool, "admin@clinic.test", "s3cret").await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'ADMIN'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
