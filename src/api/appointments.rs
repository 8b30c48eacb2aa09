//! Appointment endpoints: CRUD, filtered listing, and the lifecycle
//! transition actions (confirm / cancel / complete).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::db::{
    now_timestamp, Appointment, AppointmentFilter, AppointmentResponse, AppointmentStatus,
    CancelRequest, CreateAppointmentRequest, Customer, Pet, Role, UpdateAppointmentRequest, User,
    UserResponse,
};
use crate::engine::{lifecycle, resolve};
use crate::AppState;

use super::authz::{self, Action};
use super::error::ApiError;
use super::extract::Json;
use super::validation;

/// The customer row belonging to an authenticated customer account, matched
/// by email. None when the person has never appeared as a customer yet.
pub(super) async fn own_customer(
    pool: &crate::db::DbPool,
    user: &User,
) -> Result<Option<Customer>, ApiError> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE email = ?")
        .bind(&user.email)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
}

async fn load_relations(
    pool: &crate::db::DbPool,
    appointment: Appointment,
) -> Result<AppointmentResponse, ApiError> {
    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(appointment.customer_id)
        .fetch_optional(pool)
        .await?;

    let pet = match appointment.pet_id {
        Some(pet_id) => {
            sqlx::query_as::<_, Pet>("SELECT * FROM pets WHERE id = ?")
                .bind(pet_id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let veterinarian = match appointment.veterinarian_id {
        Some(vet_id) => sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(vet_id)
            .fetch_optional(pool)
            .await?
            .map(UserResponse::from),
        None => None,
    };

    Ok(AppointmentResponse {
        appointment,
        customer,
        pet,
        veterinarian,
    })
}

/// List appointments, filterable by customer, veterinarian, status, and
/// same-calendar-day date. Customers are pinned to their own bookings and
/// veterinarians to appointments assigned to them.
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(mut filter): Query<AppointmentFilter>,
) -> Result<Json<Vec<AppointmentResponse>>, ApiError> {
    authz::require(user.role_enum(), Action::ListAppointments)?;

    match user.role_enum() {
        Role::Customer => match own_customer(&state.db, &user).await? {
            Some(customer) => filter.customer_id = Some(customer.id),
            None => return Ok(Json(Vec::new())),
        },
        Role::Veterinarian => filter.veterinarian_id = Some(user.id),
        Role::Receptionist | Role::Admin => {}
    }

    let mut appointments = sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments
         WHERE (? IS NULL OR customer_id = ?)
           AND (? IS NULL OR veterinarian_id = ?)
           AND (? IS NULL OR status = ?)
         ORDER BY appointment_date",
    )
    .bind(filter.customer_id)
    .bind(filter.customer_id)
    .bind(filter.veterinarian_id)
    .bind(filter.veterinarian_id)
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.status.map(|s| s.as_str()))
    .fetch_all(&state.db)
    .await?;

    // Same-day matching is a post-filter over the naive timestamp prefix.
    if let Some(date) = &filter.date {
        validation::validate_date(date, "date").map_err(ApiError::validation)?;
        appointments.retain(|a| a.appointment_date.starts_with(date.as_str()));
    }

    let mut responses = Vec::with_capacity(appointments.len());
    for appointment in appointments {
        responses.push(load_relations(&state.db, appointment).await?);
    }
    Ok(Json(responses))
}

pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ListAppointments)?;

    let appointment = lifecycle::fetch(&state.db, id).await?;

    // Ownership misses read as not-found so ids cannot be probed.
    match user.role_enum() {
        Role::Customer => {
            let customer = own_customer(&state.db, &user).await?;
            if customer.map(|c| c.id) != Some(appointment.customer_id) {
                return Err(ApiError::not_found("Appointment not found"));
            }
        }
        Role::Veterinarian => {
            if appointment.veterinarian_id != Some(user.id) {
                return Err(ApiError::not_found("Appointment not found"));
            }
        }
        Role::Receptionist | Role::Admin => {}
    }

    Ok(Json(load_relations(&state.db, appointment).await?))
}

/// Book an appointment. Customers always book for themselves; the front desk
/// may book for any customer.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(mut req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentResponse>), ApiError> {
    let role = user.role_enum();
    authz::require(role, Action::CreateAppointment)?;

    if role == Role::Customer {
        // Customers book for themselves. Their account reconciles to a
        // customer record by email, never through the id-ambiguous reference
        // path, so an unrelated customer sharing the numeric id cannot be hit.
        let customer = resolve::resolve_customer_for_user(&state.db, &user).await?;
        req.customer_id = Some(customer.id);
    } else if req.customer_id.is_some() {
        authz::require(role, Action::CreateAppointmentForAnyCustomer)?;
    }

    let appointment = resolve::create_appointment(&state.db, &req).await?;

    tracing::info!(
        appointment_id = appointment.id,
        customer_id = appointment.customer_id,
        "Created appointment"
    );

    Ok((
        StatusCode::CREATED,
        Json(load_relations(&state.db, appointment).await?),
    ))
}

/// Generic partial update. Status changes flow through the same lifecycle
/// validation as the explicit transition endpoints; everything is persisted
/// with the loaded status as a precondition so a concurrent transition
/// surfaces as a conflict instead of being overwritten.
pub async fn update_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let role = user.role_enum();
    authz::require(role, Action::UpdateAppointment)?;

    // Veterinarians drive the lifecycle but do not reschedule or reassign.
    if role == Role::Veterinarian
        && (req.appointment_date.is_some() || req.reason.is_some() || req.veterinarian_id.is_some())
    {
        return Err(ApiError::forbidden(
            "You do not have permission to perform this action",
        ));
    }

    if let Some(date) = &req.appointment_date {
        resolve::resolve_schedule(&crate::db::Schedule::At {
            appointment_date: date.clone(),
        })?;
    }
    if let Some(vet_id) = req.veterinarian_id {
        resolve::resolve_veterinarian(&state.db, vet_id).await?;
    }

    let appointment = lifecycle::fetch(&state.db, id).await?;
    let current = appointment.status_enum();

    let status = match req.status {
        Some(target) if target != current => {
            let action = match target {
                AppointmentStatus::Confirmed => Action::ConfirmAppointment,
                AppointmentStatus::Cancelled => Action::CancelAppointment,
                AppointmentStatus::Completed => Action::CompleteAppointment,
                AppointmentStatus::Scheduled => Action::UpdateAppointment,
            };
            authz::require(role, action)?;
            if !lifecycle::can_transition(current, target) {
                return Err(lifecycle::LifecycleError::IllegalTransition {
                    from: current,
                    to: target,
                }
                .into());
            }
            target
        }
        _ => current,
    };

    let result = sqlx::query(
        "UPDATE appointments SET
            appointment_date = COALESCE(?, appointment_date),
            reason = COALESCE(?, reason),
            status = ?,
            veterinarian_id = COALESCE(?, veterinarian_id),
            notes = COALESCE(?, notes),
            updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(&req.appointment_date)
    .bind(&req.reason)
    .bind(status.as_str())
    .bind(req.veterinarian_id)
    .bind(&req.notes)
    .bind(now_timestamp())
    .bind(id)
    .bind(current.as_str())
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(lifecycle::LifecycleError::StaleStatus.into());
    }

    let updated = lifecycle::fetch(&state.db, id).await?;
    Ok(Json(load_relations(&state.db, updated).await?))
}

pub async fn delete_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authz::require(user.role_enum(), Action::DeleteAppointment)?;

    let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Appointment not found"));
    }

    Ok(Json(
        serde_json::json!({ "message": "Appointment deleted successfully" }),
    ))
}

/// Check-in / approval: SCHEDULED -> CONFIRMED. The stored status is the
/// same for both; the acting role is what distinguishes them.
pub async fn confirm_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ConfirmAppointment)?;

    let appointment =
        lifecycle::transition(&state.db, id, AppointmentStatus::Confirmed, None).await?;
    Ok(Json(load_relations(&state.db, appointment).await?))
}

/// Cancellation. A veterinarian rejecting a confirmed appointment must give
/// a reason; the reason is appended to the appointment notes.
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let role = user.role_enum();
    authz::require(role, Action::CancelAppointment)?;

    let appointment = lifecycle::fetch(&state.db, id).await?;
    let current = appointment.status_enum();

    let reason = req.reason.as_deref().filter(|r| !r.trim().is_empty());
    if role == Role::Veterinarian && current == AppointmentStatus::Confirmed && reason.is_none() {
        return Err(ApiError::validation("A rejection reason is required"));
    }

    if current == AppointmentStatus::Cancelled {
        return Ok(Json(load_relations(&state.db, appointment).await?));
    }

    let cancelled = lifecycle::try_transition_from(
        &state.db,
        &appointment,
        current,
        AppointmentStatus::Cancelled,
        reason,
    )
    .await?;
    Ok(Json(load_relations(&state.db, cancelled).await?))
}

/// COMPLETED is reached by a veterinarian after the visit is recorded.
pub async fn complete_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    authz::require(user.role_enum(), Action::CompleteAppointment)?;

    let appointment =
        lifecycle::transition(&state.db, id, AppointmentStatus::Completed, None).await?;
    Ok(Json(load_relations(&state.db, appointment).await?))
}
