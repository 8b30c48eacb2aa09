//! Pet endpoints. Owners manage their own animals; the front desk and
//! veterinarians get read access for booking and examination.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::db::{
    now_timestamp, CreatePetRequest, Customer, Pet, PetResponse, Role, UpdatePetRequest, User,
};
use crate::engine::resolve;
use crate::AppState;

use super::authz::{self, Action};
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::Json;
use super::validation;

fn validate_create(req: &CreatePetRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validation::validate_name(&req.name, "Pet name") {
        errors.add("name", e);
    }
    if let Err(e) = validation::validate_name(&req.species, "Species") {
        errors.add("species", e);
    }
    if let Err(e) = validation::validate_date(&req.date_of_birth, "dateOfBirth") {
        errors.add("dateOfBirth", e);
    }
    if req.gender.trim().is_empty() {
        errors.add("gender", "Gender is required");
    }

    errors.finish()
}

async fn load_owner(
    pool: &crate::db::DbPool,
    pet: Pet,
) -> Result<PetResponse, ApiError> {
    let owner = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(pet.owner_id)
        .fetch_optional(pool)
        .await?;
    Ok(PetResponse { pet, owner })
}

/// Fetch a pet enforcing owner scoping for customer callers; misses and
/// ownership misses both read as not-found.
async fn fetch_scoped(
    state: &AppState,
    user: &User,
    id: i64,
) -> Result<Pet, ApiError> {
    let pet = sqlx::query_as::<_, Pet>("SELECT * FROM pets WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Pet not found"))?;

    if user.role_enum() == Role::Customer {
        let own = super::appointments::own_customer(&state.db, user).await?;
        if own.map(|c| c.id) != Some(pet.owner_id) {
            return Err(ApiError::not_found("Pet not found"));
        }
    }

    Ok(pet)
}

pub async fn list_pets(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<PetResponse>>, ApiError> {
    authz::require(user.role_enum(), Action::ReadPets)?;

    let pets = if user.role_enum() == Role::Customer {
        match super::appointments::own_customer(&state.db, &user).await? {
            Some(customer) => {
                sqlx::query_as::<_, Pet>("SELECT * FROM pets WHERE owner_id = ? ORDER BY name")
                    .bind(customer.id)
                    .fetch_all(&state.db)
                    .await?
            }
            None => Vec::new(),
        }
    } else {
        sqlx::query_as::<_, Pet>("SELECT * FROM pets ORDER BY name")
            .fetch_all(&state.db)
            .await?
    };

    let mut responses = Vec::with_capacity(pets.len());
    for pet in pets {
        responses.push(load_owner(&state.db, pet).await?);
    }
    Ok(Json(responses))
}

pub async fn get_pet(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<PetResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ReadPets)?;

    let pet = fetch_scoped(&state, &user, id).await?;
    Ok(Json(load_owner(&state.db, pet).await?))
}

/// Customers register their own animals; the owner reference in the payload
/// is ignored and the caller's customer record (created on first use via
/// reconciliation) is used instead.
pub async fn create_pet(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreatePetRequest>,
) -> Result<(StatusCode, Json<PetResponse>), ApiError> {
    authz::require(user.role_enum(), Action::ManageOwnPets)?;
    validate_create(&req)?;

    let owner = resolve::resolve_customer_for_user(&state.db, &user).await?;

    let now = now_timestamp();
    let id = sqlx::query(
        "INSERT INTO pets (name, species, breed, date_of_birth, gender, weight, owner_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&req.name)
    .bind(&req.species)
    .bind(&req.breed)
    .bind(&req.date_of_birth)
    .bind(&req.gender)
    .bind(req.weight)
    .bind(owner.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?
    .last_insert_rowid();

    let pet = sqlx::query_as::<_, Pet>("SELECT * FROM pets WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(load_owner(&state.db, pet).await?)))
}

pub async fn update_pet(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePetRequest>,
) -> Result<Json<PetResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ManageOwnPets)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        if let Err(e) = validation::validate_name(name, "Pet name") {
            errors.add("name", e);
        }
    }
    if let Some(date_of_birth) = &req.date_of_birth {
        if let Err(e) = validation::validate_date(date_of_birth, "dateOfBirth") {
            errors.add("dateOfBirth", e);
        }
    }
    errors.finish()?;

    let pet = fetch_scoped(&state, &user, id).await?;

    sqlx::query(
        "UPDATE pets SET
            name = COALESCE(?, name),
            species = COALESCE(?, species),
            breed = COALESCE(?, breed),
            date_of_birth = COALESCE(?, date_of_birth),
            gender = COALESCE(?, gender),
            weight = COALESCE(?, weight),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(&req.name)
    .bind(&req.species)
    .bind(&req.breed)
    .bind(&req.date_of_birth)
    .bind(&req.gender)
    .bind(req.weight)
    .bind(now_timestamp())
    .bind(pet.id)
    .execute(&state.db)
    .await?;

    let updated = sqlx::query_as::<_, Pet>("SELECT * FROM pets WHERE id = ?")
        .bind(pet.id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(load_owner(&state.db, updated).await?))
}

/// Owner-scoped deletion, RESTRICT while appointments or medical records
/// still reference the animal.
pub async fn delete_pet(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authz::require(user.role_enum(), Action::ManageOwnPets)?;

    let pet = fetch_scoped(&state, &user, id).await?;

    let result = sqlx::query("DELETE FROM pets WHERE id = ?")
        .bind(pet.id)
        .execute(&state.db)
        .await;

    match result {
        Err(sqlx::Error::Database(e)) if e.message().contains("FOREIGN KEY constraint failed") => {
            Err(ApiError::conflict(
                "Pet has appointments or medical records on file and cannot be deleted",
            ))
        }
        Err(e) => Err(e.into()),
        Ok(_) => Ok(Json(
            serde_json::json!({ "message": "Pet deleted successfully" }),
        )),
    }
}
