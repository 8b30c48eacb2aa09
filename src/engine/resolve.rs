//! Booking input resolution.
//!
//! Clients reference the parties of an appointment loosely: the customer may
//! arrive as a customer id, as the id of the account the person logs in with,
//! or not at all; the pet may be an existing row or a free-text name/species
//! pair; the timestamp may be combined or split into date + time. Everything
//! is resolved here, before any appointment row is written.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::db::{
    now_timestamp, Appointment, AppointmentStatus, CreateAppointmentRequest, Customer, DbPool,
    PetRef, Role, Schedule, User,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Customer not found")]
    CustomerNotFound,
    #[error("A customer is required when booking with a new pet")]
    CustomerRequired,
    #[error("Pet not found")]
    PetNotFound,
    #[error("Veterinarian not found")]
    VeterinarianNotFound,
    #[error("Invalid appointment date: {0}")]
    InvalidSchedule(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Map an incoming customer reference to a Customer row. This is the path
/// for the ambiguous `customerId` supplied by clerical callers, who may hold
/// either kind of id.
///
/// Resolution order: a Customer with that id; failing that, a User with that
/// id, reconciled to a Customer by email (created with empty phone/address
/// when none exists). Reconciliation is idempotent: the unique email
/// constraint resolves a concurrent first-time creation, converting the
/// duplicate-key failure into a re-lookup of the row the other writer made.
pub async fn resolve_customer(pool: &DbPool, reference: i64) -> Result<Customer, ResolveError> {
    if let Some(customer) = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(reference)
        .fetch_optional(pool)
        .await?
    {
        return Ok(customer);
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(reference)
        .fetch_optional(pool)
        .await?
        .ok_or(ResolveError::CustomerNotFound)?;

    find_or_create_by_email(pool, &user).await
}

/// Reconcile an authenticated user to their customer record. User ids and
/// customer ids come from independent sequences, so a known user must never
/// be looked up through the id-ambiguous path above: a customer row that
/// happens to share the numeric id would shadow the caller's own identity.
pub async fn resolve_customer_for_user(
    pool: &DbPool,
    user: &User,
) -> Result<Customer, ResolveError> {
    find_or_create_by_email(pool, user).await
}

async fn find_or_create_by_email(pool: &DbPool, user: &User) -> Result<Customer, ResolveError> {
    if let Some(customer) = fetch_by_email(pool, &user.email).await? {
        return Ok(customer);
    }

    let now = now_timestamp();
    let inserted = sqlx::query(
        "INSERT INTO customers (first_name, last_name, email, phone, address, created_at, updated_at)
         VALUES (?, ?, ?, '', '', ?, ?)",
    )
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => fetch_by_email(pool, &user.email)
            .await?
            .ok_or(ResolveError::CustomerNotFound),
        Err(e) if is_unique_violation(&e) => {
            // Another request created the customer between our lookup and
            // insert; use theirs.
            fetch_by_email(pool, &user.email)
                .await?
                .ok_or(ResolveError::CustomerNotFound)
        }
        Err(e) => Err(e.into()),
    }
}

async fn fetch_by_email(pool: &DbPool, email: &str) -> Result<Option<Customer>, sqlx::Error> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

/// Normalize the schedule into a naive local timestamp string. Separate
/// date + time fields are joined with a `T`; no timezone conversion happens.
pub fn resolve_schedule(schedule: &Schedule) -> Result<String, ResolveError> {
    match schedule {
        Schedule::At { appointment_date } => {
            parse_timestamp(appointment_date)
                .ok_or_else(|| ResolveError::InvalidSchedule(appointment_date.clone()))?;
            Ok(appointment_date.clone())
        }
        Schedule::DateTime { date, time } => {
            let d = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| ResolveError::InvalidSchedule(date.clone()))?;
            let t = NaiveTime::parse_from_str(time, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
                .map_err(|_| ResolveError::InvalidSchedule(time.clone()))?;
            let _ = d.and_time(t);
            Ok(format!("{}T{}", date, time))
        }
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Resolve a veterinarian reference: the user must exist and hold exactly
/// the VETERINARIAN role.
pub async fn resolve_veterinarian(pool: &DbPool, id: i64) -> Result<User, ResolveError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ResolveError::VeterinarianNotFound)?;

    if user.role_enum() != Role::Veterinarian {
        return Err(ResolveError::VeterinarianNotFound);
    }

    Ok(user)
}

/// Resolve a booking request into a canonical appointment row and persist it.
///
/// All referential checks run before the insert so a failed booking leaves
/// nothing behind (the find-or-create of the customer record itself is the
/// one intended side effect of reconciliation).
pub async fn create_appointment(
    pool: &DbPool,
    req: &CreateAppointmentRequest,
) -> Result<Appointment, ResolveError> {
    let appointment_date = resolve_schedule(&req.schedule)?;

    if let Some(vet_id) = req.veterinarian_id {
        resolve_veterinarian(pool, vet_id).await?;
    }

    let (pet_id, pet_name, pet_species, owner_id) = match &req.pet {
        PetRef::ById { pet_id } => {
            let pet = sqlx::query_as::<_, crate::db::Pet>("SELECT * FROM pets WHERE id = ?")
                .bind(pet_id)
                .fetch_optional(pool)
                .await?
                .ok_or(ResolveError::PetNotFound)?;
            (Some(pet.id), None, None, Some(pet.owner_id))
        }
        PetRef::Inline {
            pet_name,
            pet_species,
        } => (None, Some(pet_name.clone()), Some(pet_species.clone()), None),
    };

    let customer = match (req.customer_id, owner_id) {
        (Some(reference), _) => resolve_customer(pool, reference).await?,
        (None, Some(owner)) => {
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
                .bind(owner)
                .fetch_optional(pool)
                .await?
                .ok_or(ResolveError::CustomerNotFound)?
        }
        (None, None) => return Err(ResolveError::CustomerRequired),
    };

    let status = req.status.unwrap_or(AppointmentStatus::Scheduled);
    let reason = req.reason.clone().unwrap_or_default();
    let now = now_timestamp();

    let id = sqlx::query(
        "INSERT INTO appointments
         (appointment_date, reason, status, customer_id, pet_id, pet_name, pet_species,
          veterinarian_id, notes, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&appointment_date)
    .bind(&reason)
    .bind(status.as_str())
    .bind(customer.id)
    .bind(pet_id)
    .bind(&pet_name)
    .bind(&pet_species)
    .bind(req.veterinarian_id)
    .bind(&req.notes)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    fn booking(json: serde_json::Value) -> CreateAppointmentRequest {
        serde_json::from_value(json).expect("valid booking payload")
    }

    #[tokio::test]
    async fn user_reference_reconciles_to_one_customer() {
        let pool = test_support::pool().await;
        let user_id = test_support::insert_user(&pool, "jane@example.com", "CUSTOMER").await;

        let first = resolve_customer(&pool, user_id).await.unwrap();
        assert_eq!(first.email, "jane@example.com");
        assert!(first.phone.is_empty());

        // A second identical call reuses the same row.
        let second = resolve_customer(&pool, user_id).await.unwrap();
        assert_eq!(first.id, second.id);

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM customers WHERE email = 'jane@example.com'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn customer_id_wins_over_user_lookup() {
        let pool = test_support::pool().await;
        let customer_id = test_support::insert_customer(&pool, "direct@example.com").await;
        // A user sharing the same id must not shadow the customer row.
        test_support::insert_user(&pool, "other@example.com", "CUSTOMER").await;

        let resolved = resolve_customer(&pool, customer_id).await.unwrap();
        assert_eq!(resolved.email, "direct@example.com");
    }

    #[tokio::test]
    async fn known_user_reconciles_by_email_despite_id_collision() {
        // Bob's customer row and Jane's user row share the numeric id 1.
        // Resolving Jane through the id-ambiguous path would hand her Bob's
        // identity; the user-aware path must go by email.
        let pool = test_support::pool().await;
        let bob = test_support::insert_customer(&pool, "bob@example.com").await;
        let jane_id = test_support::insert_user(&pool, "jane@example.com", "CUSTOMER").await;
        assert_eq!(bob, jane_id);

        let jane = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(jane_id)
            .fetch_one(&pool)
            .await
            .unwrap();

        let customer = resolve_customer_for_user(&pool, &jane).await.unwrap();
        assert_eq!(customer.email, "jane@example.com");
        assert_ne!(customer.id, bob);
    }

    #[tokio::test]
    async fn unknown_reference_is_customer_not_found() {
        let pool = test_support::pool().await;
        let err = resolve_customer(&pool, 404).await.unwrap_err();
        assert!(matches!(err, ResolveError::CustomerNotFound));
    }

    #[tokio::test]
    async fn booking_by_user_id_and_pet_id() {
        // Scenario: {customerId: <user id>, petId, date, time, reason} yields
        // a SCHEDULED appointment with a reconciled customer and the combined
        // timestamp. The filler user staggers the sequences so Jane's user id
        // has no customer row and the reference falls through to the account.
        let pool = test_support::pool().await;
        let owner = test_support::insert_customer(&pool, "owner@example.com").await;
        test_support::insert_user(&pool, "filler@example.com", "CUSTOMER").await;
        let user_id = test_support::insert_user(&pool, "jane@example.com", "CUSTOMER").await;
        let pet = test_support::insert_pet(&pool, owner, "Rex").await;
        assert_ne!(user_id, owner);

        let req = booking(serde_json::json!({
            "customerId": user_id,
            "petId": pet,
            "date": "2025-10-25",
            "time": "10:00",
            "reason": "checkup",
        }));

        let appt = create_appointment(&pool, &req).await.unwrap();
        assert_eq!(appt.status, "SCHEDULED");
        assert_eq!(appt.appointment_date, "2025-10-25T10:00");
        assert_eq!(appt.pet_id, Some(pet));
        assert_eq!(appt.reason, "checkup");

        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
            .bind(appt.customer_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(customer.email, "jane@example.com");
    }

    #[tokio::test]
    async fn pet_id_takes_precedence_over_inline_fields() {
        let pool = test_support::pool().await;
        let owner = test_support::insert_customer(&pool, "owner@example.com").await;
        let pet = test_support::insert_pet(&pool, owner, "Rex").await;

        let req = booking(serde_json::json!({
            "petId": pet,
            "petName": "Somebody Else",
            "petType": "Cat",
            "appointmentDate": "2025-10-25T10:00",
        }));

        let appt = create_appointment(&pool, &req).await.unwrap();
        assert_eq!(appt.pet_id, Some(pet));
        assert_eq!(appt.pet_name, None);
        // Customer derived from the pet's owner.
        assert_eq!(appt.customer_id, owner);
    }

    #[tokio::test]
    async fn inline_pet_is_stored_descriptively() {
        let pool = test_support::pool().await;
        let customer = test_support::insert_customer(&pool, "owner@example.com").await;

        let req = booking(serde_json::json!({
            "customerId": customer,
            "petName": "Whiskers",
            "petType": "Cat",
            "appointmentDate": "2025-11-01T09:30",
        }));

        let appt = create_appointment(&pool, &req).await.unwrap();
        assert_eq!(appt.pet_id, None);
        assert_eq!(appt.pet_name.as_deref(), Some("Whiskers"));
        assert_eq!(appt.pet_species.as_deref(), Some("Cat"));

        // No Pet row is created from descriptive fields.
        let pets: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(pets.0, 0);
    }

    #[tokio::test]
    async fn inline_pet_without_customer_is_rejected() {
        let pool = test_support::pool().await;
        let req = booking(serde_json::json!({
            "petName": "Whiskers",
            "petType": "Cat",
            "appointmentDate": "2025-11-01T09:30",
        }));

        let err = create_appointment(&pool, &req).await.unwrap_err();
        assert!(matches!(err, ResolveError::CustomerRequired));
    }

    #[tokio::test]
    async fn missing_pet_id_is_pet_not_found() {
        let pool = test_support::pool().await;
        let customer = test_support::insert_customer(&pool, "owner@example.com").await;

        let req = booking(serde_json::json!({
            "customerId": customer,
            "petId": 999,
            "appointmentDate": "2025-11-01T09:30",
        }));

        let err = create_appointment(&pool, &req).await.unwrap_err();
        assert!(matches!(err, ResolveError::PetNotFound));
    }

    #[tokio::test]
    async fn non_veterinarian_reference_fails_with_no_write() {
        let pool = test_support::pool().await;
        let customer = test_support::insert_customer(&pool, "owner@example.com").await;
        let pet = test_support::insert_pet(&pool, customer, "Rex").await;
        let receptionist = test_support::insert_user(&pool, "desk@example.com", "RECEPTIONIST").await;

        let req = booking(serde_json::json!({
            "customerId": customer,
            "petId": pet,
            "veterinarianId": receptionist,
            "appointmentDate": "2025-11-01T09:30",
        }));

        let err = create_appointment(&pool, &req).await.unwrap_err();
        assert!(matches!(err, ResolveError::VeterinarianNotFound));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM appointments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[test]
    fn schedule_combination_and_validation() {
        let combined = resolve_schedule(&Schedule::DateTime {
            date: "2025-10-25".into(),
            time: "10:00".into(),
        })
        .unwrap();
        assert_eq!(combined, "2025-10-25T10:00");

        assert!(resolve_schedule(&Schedule::At {
            appointment_date: "2025-10-25T10:00".into()
        })
        .is_ok());
        assert!(resolve_schedule(&Schedule::At {
            appointment_date: "not-a-date".into()
        })
        .is_err());
        assert!(resolve_schedule(&Schedule::DateTime {
            date: "2025-13-40".into(),
            time: "10:00".into(),
        })
        .is_err());
    }
}
