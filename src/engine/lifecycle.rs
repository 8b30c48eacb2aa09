//! Appointment status state machine.
//!
//! Transitions are applied check-then-set: the current status is loaded and
//! validated, then persisted with a conditional UPDATE keyed on that status.
//! If a concurrent writer moved the appointment first, the UPDATE matches
//! zero rows and the caller gets an explicit stale-status error instead of
//! silently overwriting the winner.

use thiserror::Error;

use crate::db::{now_timestamp, Appointment, AppointmentStatus, DbPool};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Appointment not found")]
    NotFound,
    #[error("Cannot transition appointment from {from} to {to}")]
    IllegalTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("Appointment status was changed by another request; reload and retry")]
    StaleStatus,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Whether `from -> to` is a legal transition. Same-state writes are not
/// transitions; callers treat them as no-ops.
pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    match (from, to) {
        (Scheduled, Confirmed) => true,
        // Any non-terminal state may be cancelled or completed.
        (Scheduled | Confirmed, Cancelled) => true,
        (Scheduled | Confirmed, Completed) => true,
        _ => false,
    }
}

pub async fn fetch(pool: &DbPool, id: i64) -> Result<Appointment, LifecycleError> {
    sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(LifecycleError::NotFound)
}

/// Transition an appointment to `to`, loading the current status first.
/// `note`, when present, is appended to the appointment notes in the same
/// write (used for cancellation reasons).
pub async fn transition(
    pool: &DbPool,
    id: i64,
    to: AppointmentStatus,
    note: Option<&str>,
) -> Result<Appointment, LifecycleError> {
    let appointment = fetch(pool, id).await?;
    let from = appointment.status_enum();

    if from == to {
        return Ok(appointment);
    }

    try_transition_from(pool, &appointment, from, to, note).await
}

/// The check-then-set core: persist `to` only if the row still holds `from`.
pub async fn try_transition_from(
    pool: &DbPool,
    appointment: &Appointment,
    from: AppointmentStatus,
    to: AppointmentStatus,
    note: Option<&str>,
) -> Result<Appointment, LifecycleError> {
    if !can_transition(from, to) {
        return Err(LifecycleError::IllegalTransition { from, to });
    }

    let notes = match note {
        Some(n) => Some(match &appointment.notes {
            Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, n),
            _ => n.to_string(),
        }),
        None => appointment.notes.clone(),
    };

    let result = sqlx::query(
        "UPDATE appointments SET status = ?, notes = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(&notes)
    .bind(now_timestamp())
    .bind(appointment.id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LifecycleError::StaleStatus);
    }

    fetch(pool, appointment.id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;
    use AppointmentStatus::*;

    #[test]
    fn terminal_states_reject_every_target() {
        for from in [Completed, Cancelled] {
            for to in [Scheduled, Confirmed, Completed, Cancelled] {
                if from == to {
                    continue;
                }
                assert!(!can_transition(from, to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn nothing_returns_to_scheduled() {
        for from in [Confirmed, Completed, Cancelled] {
            assert!(!can_transition(from, Scheduled));
        }
    }

    #[test]
    fn legal_paths() {
        assert!(can_transition(Scheduled, Confirmed));
        assert!(can_transition(Scheduled, Cancelled));
        assert!(can_transition(Scheduled, Completed));
        assert!(can_transition(Confirmed, Cancelled));
        assert!(can_transition(Confirmed, Completed));
    }

    #[tokio::test]
    async fn reject_then_complete_fails() {
        // Scenario: a veterinarian rejects a confirmed appointment, then a
        // later attempt to complete it must fail.
        let pool = test_support::pool().await;
        let customer = test_support::insert_customer(&pool, "owner@example.com").await;
        let id = test_support::insert_appointment(&pool, customer, "CONFIRMED").await;

        let rejected = transition(&pool, id, Cancelled, Some("no slot")).await.unwrap();
        assert_eq!(rejected.status, "CANCELLED");
        assert_eq!(rejected.notes.as_deref(), Some("no slot"));

        let err = transition(&pool, id, Completed, None).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::IllegalTransition { from: Cancelled, to: Completed }
        ));
    }

    #[tokio::test]
    async fn same_status_write_is_a_noop() {
        let pool = test_support::pool().await;
        let customer = test_support::insert_customer(&pool, "owner@example.com").await;
        let id = test_support::insert_appointment(&pool, customer, "CONFIRMED").await;

        let unchanged = transition(&pool, id, Confirmed, None).await.unwrap();
        assert_eq!(unchanged.status, "CONFIRMED");
    }

    #[tokio::test]
    async fn concurrent_loser_gets_stale_status() {
        // Two actors both loaded the appointment as SCHEDULED. The first
        // confirms it; the second, still holding the stale snapshot, tries to
        // cancel and must get an explicit conflict rather than overwriting.
        let pool = test_support::pool().await;
        let customer = test_support::insert_customer(&pool, "owner@example.com").await;
        let id = test_support::insert_appointment(&pool, customer, "SCHEDULED").await;

        let snapshot = fetch(&pool, id).await.unwrap();

        let confirmed =
            try_transition_from(&pool, &snapshot, Scheduled, Confirmed, None).await.unwrap();
        assert_eq!(confirmed.status, "CONFIRMED");

        let err = try_transition_from(&pool, &snapshot, Scheduled, Cancelled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::StaleStatus));

        // Exactly one of the two transitions persisted.
        let current = fetch(&pool, id).await.unwrap();
        assert_eq!(current.status, "CONFIRMED");
    }

    #[tokio::test]
    async fn missing_appointment_is_not_found() {
        let pool = test_support::pool().await;
        let err = transition(&pool, 999, Confirmed, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound));
    }
}
