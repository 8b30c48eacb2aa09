//! Customer record endpoints. Clerical roles manage the register; a customer
//! account can read its own record.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::db::{now_timestamp, CreateCustomerRequest, Customer, Role, UpdateCustomerRequest, User};
use crate::AppState;

use super::authz::{self, Action};
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::Json;
use super::validation;

fn validate_create(req: &CreateCustomerRequest) -> Result<(), ApiError> {
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
    if let Err(e) = validation::validate_phone(&req.phone) {
        errors.add("phone", e);
    }

    errors.finish()
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<Customer>>, ApiError> {
    authz::require(user.role_enum(), Action::ReadCustomers)?;

    if user.role_enum() == Role::Customer {
        // A customer's view of the register is just their own row.
        let own = super::appointments::own_customer(&state.db, &user).await?;
        return Ok(Json(own.into_iter().collect()));
    }

    let customers =
        sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY last_name, first_name")
            .fetch_all(&state.db)
            .await?;
    Ok(Json(customers))
}

pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<Customer>, ApiError> {
    authz::require(user.role_enum(), Action::ReadCustomers)?;

    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Customer not found"))?;

    if user.role_enum() == Role::Customer && customer.email != user.email {
        return Err(ApiError::not_found("Customer not found"));
    }

    Ok(Json(customer))
}

pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    authz::require(user.role_enum(), Action::ManageCustomers)?;
    validate_create(&req)?;

    let now = now_timestamp();
    let insert = sqlx::query(
        "INSERT INTO customers (first_name, last_name, email, phone, address, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.email)
    .bind(&req.phone)
    .bind(&req.address)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await;

    let id = match insert {
        Ok(result) => result.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE constraint failed") => {
            return Err(ApiError::conflict("A customer with this email already exists"));
        }
        Err(e) => return Err(e.into()),
    };

    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCustomerRequest>,
) -> Result<Json<Customer>, ApiError> {
    authz::require(user.role_enum(), Action::ManageCustomers)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(first_name) = &req.first_name {
        if let Err(e) = validation::validate_name(first_name, "First name") {
            errors.add("firstName", e);
        }
    }
    if let Some(last_name) = &req.last_name {
        if let Err(e) = validation::validate_name(last_name, "Last name") {
            errors.add("lastName", e);
        }
    }
    if let Some(email) = &req.email {
        if let Err(e) = validation::validate_email(email) {
            errors.add("email", e);
        }
    }
    if let Some(phone) = &req.phone {
        if let Err(e) = validation::validate_phone(phone) {
            errors.add("phone", e);
        }
    }
    errors.finish()?;

    let existing = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_none() {
        return Err(ApiError::not_found("Customer not found"));
    }

    let result = sqlx::query(
        "UPDATE customers SET
            first_name = COALESCE(?, first_name),
            last_name = COALESCE(?, last_name),
            email = COALESCE(?, email),
            phone = COALESCE(?, phone),
            address = COALESCE(?, address),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.email)
    .bind(&req.phone)
    .bind(&req.address)
    .bind(now_timestamp())
    .bind(id)
    .execute(&state.db)
    .await;

    if let Err(sqlx::Error::Database(e)) = &result {
        if e.message().contains("UNIQUE constraint failed") {
            return Err(ApiError::conflict("A customer with this email already exists"));
        }
    }
    result?;

    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(customer))
}

/// Deletion is RESTRICT: a customer with pets, appointments, or invoices on
/// file cannot be removed.
pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authz::require(user.role_enum(), Action::ManageCustomers)?;

    let result = sqlx::query("DELETE FROM customers WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await;

    let result = match result {
        Err(sqlx::Error::Database(e)) if e.message().contains("FOREIGN KEY constraint failed") => {
            return Err(ApiError::conflict(
                "Customer has pets, appointments, or invoices on file and cannot be deleted",
            ));
        }
        other => other?,
    };

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Customer not found"));
    }

    Ok(Json(
        serde_json::json!({ "message": "Customer deleted successfully" }),
    ))
}
