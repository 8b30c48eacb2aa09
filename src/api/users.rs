//! User administration endpoints (ADMIN only).

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::db::{now_timestamp, CreateUserRequest, UpdateUserRequest, User, UserResponse};
use crate::AppState;

use super::auth::hash_password;
use super::authz::{self, Action};
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::Json;
use super::validation;

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    authz::require(user.role_enum(), Action::ManageUsers)?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY last_name, first_name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ManageUsers)?;

    let found = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(UserResponse::from(found)))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    authz::require(user.role_enum(), Action::ManageUsers)?;

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
    errors.finish()?;

    // Hashed exactly once, here at creation.
    let password_hash = hash_password(&req.password)?;
    let now = now_timestamp();

    let insert = sqlx::query(
        "INSERT INTO users (first_name, last_name, email, password_hash, role, specialization, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(req.role.as_str())
    .bind(&req.specialization)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await;

    let id = match insert {
        Ok(result) => result.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE constraint failed") => {
            return Err(ApiError::conflict("User with this email already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    let created = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(created))))
}

/// Partial update. The stored hash is untouched unless a new plaintext
/// password arrives.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ManageUsers)?;

    let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    if let Some(email) = &req.email {
        validation::validate_email(email).map_err(ApiError::validation)?;
    }

    let password_hash = match req.password.as_deref() {
        Some(password) if !password.is_empty() => Some(hash_password(password)?),
        _ => None,
    };

    let result = sqlx::query(
        "UPDATE users SET
            first_name = COALESCE(?, first_name),
            last_name = COALESCE(?, last_name),
            email = COALESCE(?, email),
            password_hash = COALESCE(?, password_hash),
            role = COALESCE(?, role),
            specialization = COALESCE(?, specialization),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(req.role.map(|r| r.as_str()))
    .bind(&req.specialization)
    .bind(now_timestamp())
    .bind(id)
    .execute(&state.db)
    .await;

    if let Err(sqlx::Error::Database(e)) = &result {
        if e.message().contains("UNIQUE constraint failed") {
            return Err(ApiError::conflict("User with this email already exists"));
        }
    }
    result?;

    let updated = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(UserResponse::from(updated)))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authz::require(user.role_enum(), Action::ManageUsers)?;

    if id == user.id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await;

    let result = match result {
        Err(sqlx::Error::Database(e)) if e.message().contains("FOREIGN KEY constraint failed") => {
            return Err(ApiError::conflict(
                "User is referenced by appointments or medical records and cannot be deleted",
            ));
        }
        other => other?,
    };

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(Json(
        serde_json::json!({ "message": "User deleted successfully" }),
    ))
}
