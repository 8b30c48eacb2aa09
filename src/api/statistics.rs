//! Dashboard statistics (ADMIN only).

use axum::extract::State;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{Role, User};
use crate::AppState;

use super::authz::{self, Action};
use super::error::ApiError;
use super::extract::Json;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_users: i64,
    pub total_customers: i64,
    pub total_pets: i64,
    pub total_appointments: i64,
    pub total_veterinarians: i64,
    pub total_revenue: f64,
    pub appointments_by_status: BTreeMap<String, i64>,
}

async fn count(pool: &crate::db::DbPool, sql: &str) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as(sql).fetch_one(pool).await?;
    Ok(n)
}

pub async fn get_statistics(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Statistics>, ApiError> {
    authz::require(user.role_enum(), Action::ViewStatistics)?;

    let total_users = count(&state.db, "SELECT COUNT(*) FROM users").await?;
    let total_customers = count(&state.db, "SELECT COUNT(*) FROM customers").await?;
    let total_pets = count(&state.db, "SELECT COUNT(*) FROM pets").await?;
    let total_appointments = count(&state.db, "SELECT COUNT(*) FROM appointments").await?;

    let (total_veterinarians,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = ?")
            .bind(Role::Veterinarian.as_str())
            .fetch_one(&state.db)
            .await?;

    let (total_revenue,): (Option<f64>,) =
        sqlx::query_as("SELECT SUM(total_amount) FROM invoices")
            .fetch_one(&state.db)
            .await?;

    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM appointments GROUP BY status")
            .fetch_all(&state.db)
            .await?;
    let appointments_by_status = rows.into_iter().collect();

    Ok(Json(Statistics {
        total_users,
        total_customers,
        total_pets,
        total_appointments,
        total_veterinarians,
        total_revenue: total_revenue.unwrap_or(0.0),
        appointments_by_status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    #[tokio::test]
    async fn empty_clinic_reports_zeroes() {
        let pool = test_support::pool().await;
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await.unwrap(), 0);
        let (revenue,): (Option<f64>,) =
            sqlx::query_as("SELECT SUM(total_amount) FROM invoices")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(revenue, None);
    }

    #[tokio::test]
    async fn status_breakdown_groups_rows() {
        let pool = test_support::pool().await;
        let customer_id = test_support::insert_customer(&pool, "stats@example.com")
            .await;
        test_support::insert_appointment(&pool, customer_id, "SCHEDULED").await;
        test_support::insert_appointment(&pool, customer_id, "SCHEDULED").await;
        test_support::insert_appointment(&pool, customer_id, "COMPLETED").await;

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM appointments GROUP BY status")
                .fetch_all(&pool)
                .await
                .unwrap();
        let by_status: BTreeMap<String, i64> = rows.into_iter().collect();
        assert_eq!(by_status.get("SCHEDULED"), Some(&2));
        assert_eq!(by_status.get("COMPLETED"), Some(&1));
    }
}
