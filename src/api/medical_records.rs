//! Medical record endpoints. Veterinarians author records; customers can
//! read the history of their own pets. Recording a diagnosis never moves the
//! linked appointment; completion stays an explicit veterinarian action.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{
    now_timestamp, CreateMedicalRecordRequest, MedicalRecord, MedicalRecordResponse, Pet, Role,
    UpdateMedicalRecordRequest, User, UserResponse,
};
use crate::AppState;

use super::authz::{self, Action};
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::Json;
use super::validation;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecordFilter {
    pub pet_id: Option<i64>,
}

fn join_prescriptions(prescriptions: &[String]) -> Option<String> {
    let cleaned: Vec<&str> = prescriptions
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n"))
    }
}

async fn load_relations(
    pool: &crate::db::DbPool,
    record: MedicalRecord,
) -> Result<MedicalRecordResponse, ApiError> {
    let pet = sqlx::query_as::<_, Pet>("SELECT * FROM pets WHERE id = ?")
        .bind(record.pet_id)
        .fetch_optional(pool)
        .await?;
    let veterinarian = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(record.veterinarian_id)
        .fetch_optional(pool)
        .await?
        .map(UserResponse::from);
    Ok(MedicalRecordResponse {
        record,
        pet,
        veterinarian,
    })
}

pub async fn list_medical_records(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(filter): Query<MedicalRecordFilter>,
) -> Result<Json<Vec<MedicalRecordResponse>>, ApiError> {
    authz::require(user.role_enum(), Action::ReadMedicalRecords)?;

    let records = match user.role_enum() {
        Role::Customer => {
            // Only records for pets the caller owns.
            match super::appointments::own_customer(&state.db, &user).await? {
                Some(customer) => {
                    sqlx::query_as::<_, MedicalRecord>(
                        "SELECT mr.* FROM medical_records mr
                         JOIN pets p ON p.id = mr.pet_id
                         WHERE p.owner_id = ? AND (? IS NULL OR mr.pet_id = ?)
                         ORDER BY mr.record_date DESC",
                    )
                    .bind(customer.id)
                    .bind(filter.pet_id)
                    .bind(filter.pet_id)
                    .fetch_all(&state.db)
                    .await?
                }
                None => Vec::new(),
            }
        }
        _ => {
            sqlx::query_as::<_, MedicalRecord>(
                "SELECT * FROM medical_records
                 WHERE (? IS NULL OR pet_id = ?)
                 ORDER BY record_date DESC",
            )
            .bind(filter.pet_id)
            .bind(filter.pet_id)
            .fetch_all(&state.db)
            .await?
        }
    };

    let mut responses = Vec::with_capacity(records.len());
    for record in records {
        responses.push(load_relations(&state.db, record).await?);
    }
    Ok(Json(responses))
}

pub async fn get_medical_record(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<MedicalRecordResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ReadMedicalRecords)?;

    let record = sqlx::query_as::<_, MedicalRecord>("SELECT * FROM medical_records WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Medical record not found"))?;

    if user.role_enum() == Role::Customer {
        let owns: Option<(i64,)> = sqlx::query_as(
            "SELECT p.id FROM pets p
             JOIN customers c ON c.id = p.owner_id
             WHERE p.id = ? AND c.email = ?",
        )
        .bind(record.pet_id)
        .bind(&user.email)
        .fetch_optional(&state.db)
        .await?;
        if owns.is_none() {
            return Err(ApiError::not_found("Medical record not found"));
        }
    }

    Ok(Json(load_relations(&state.db, record).await?))
}

/// Record a diagnosis. The author is always the calling veterinarian; it does
/// not gate on any appointment status.
pub async fn create_medical_record(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateMedicalRecordRequest>,
) -> Result<(StatusCode, Json<MedicalRecordResponse>), ApiError> {
    authz::require(user.role_enum(), Action::CreateMedicalRecord)?;

    let mut errors = ValidationErrorBuilder::new();
    if req.diagnosis.trim().is_empty() {
        errors.add("diagnosis", "Diagnosis is required");
    }
    if req.treatment.trim().is_empty() {
        errors.add("treatment", "Treatment is required");
    }
    if let Some(date) = &req.record_date {
        if let Err(e) = validation::validate_date(date, "recordDate") {
            errors.add("recordDate", e);
        }
    }
    errors.finish()?;

    let pet: Option<Pet> = sqlx::query_as("SELECT * FROM pets WHERE id = ?")
        .bind(req.pet_id)
        .fetch_optional(&state.db)
        .await?;
    if pet.is_none() {
        return Err(ApiError::validation("Pet not found"));
    }

    let record_date = req
        .record_date
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());
    let now = now_timestamp();

    let id = sqlx::query(
        "INSERT INTO medical_records
         (record_date, diagnosis, treatment, notes, prescriptions, pet_id, veterinarian_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record_date)
    .bind(&req.diagnosis)
    .bind(&req.treatment)
    .bind(&req.notes)
    .bind(join_prescriptions(&req.prescriptions))
    .bind(req.pet_id)
    .bind(user.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?
    .last_insert_rowid();

    let record = sqlx::query_as::<_, MedicalRecord>("SELECT * FROM medical_records WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(load_relations(&state.db, record).await?),
    ))
}

/// Author-scoped update.
pub async fn update_medical_record(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMedicalRecordRequest>,
) -> Result<Json<MedicalRecordResponse>, ApiError> {
    authz::require(user.role_enum(), Action::CreateMedicalRecord)?;

    let record = sqlx::query_as::<_, MedicalRecord>("SELECT * FROM medical_records WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Medical record not found"))?;

    if record.veterinarian_id != user.id {
        return Err(ApiError::not_found("Medical record not found"));
    }

    if let Some(date) = &req.record_date {
        validation::validate_date(date, "recordDate").map_err(ApiError::validation)?;
    }

    // A supplied prescriptions field always overwrites, so an explicit empty
    // list clears the column; COALESCE would silently keep the old value.
    let prescriptions = req.prescriptions.as_deref().map(join_prescriptions);

    sqlx::query(
        "UPDATE medical_records SET
            record_date = COALESCE(?, record_date),
            diagnosis = COALESCE(?, diagnosis),
            treatment = COALESCE(?, treatment),
            notes = COALESCE(?, notes),
            prescriptions = CASE WHEN ? THEN ? ELSE prescriptions END,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(&req.record_date)
    .bind(&req.diagnosis)
    .bind(&req.treatment)
    .bind(&req.notes)
    .bind(prescriptions.is_some())
    .bind(prescriptions.flatten())
    .bind(now_timestamp())
    .bind(id)
    .execute(&state.db)
    .await?;

    let updated = sqlx::query_as::<_, MedicalRecord>("SELECT * FROM medical_records WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(load_relations(&state.db, updated).await?))
}

/// Author-scoped deletion.
pub async fn delete_medical_record(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authz::require(user.role_enum(), Action::CreateMedicalRecord)?;

    let record = sqlx::query_as::<_, MedicalRecord>("SELECT * FROM medical_records WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Medical record not found"))?;

    if record.veterinarian_id != user.id {
        return Err(ApiError::not_found("Medical record not found"));
    }

    sqlx::query("DELETE FROM medical_records WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    Ok(Json(
        serde_json::json!({ "message": "Medical record deleted successfully" }),
    ))
}
