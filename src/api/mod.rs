mod appointments;
pub mod auth;
pub mod authz;
mod customers;
mod error;
mod extract;
mod invoices;
mod medical_records;
mod pets;
mod statistics;
mod users;
mod validation;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub use error::ApiError;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public; /me authenticates via its bearer token)
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    // Authenticated routes; each handler extracts the calling user and
    // checks its own capability.
    let api_routes = Router::new()
        // Appointments
        .route("/appointments", get(appointments::list_appointments))
        .route("/appointments", post(appointments::create_appointment))
        .route("/appointments/:id", get(appointments::get_appointment))
        .route("/appointments/:id", put(appointments::update_appointment))
        .route("/appointments/:id", delete(appointments::delete_appointment))
        .route("/appointments/:id/confirm", post(appointments::confirm_appointment))
        .route("/appointments/:id/cancel", post(appointments::cancel_appointment))
        .route("/appointments/:id/complete", post(appointments::complete_appointment))
        // Customers
        .route("/customers", get(customers::list_customers))
        .route("/customers", post(customers::create_customer))
        .route("/customers/:id", get(customers::get_customer))
        .route("/customers/:id", put(customers::update_customer))
        .route("/customers/:id", delete(customers::delete_customer))
        // Pets
        .route("/pets", get(pets::list_pets))
        .route("/pets", post(pets::create_pet))
        .route("/pets/:id", get(pets::get_pet))
        .route("/pets/:id", put(pets::update_pet))
        .route("/pets/:id", delete(pets::delete_pet))
        // Medical records
        .route("/medical-records", get(medical_records::list_medical_records))
        .route("/medical-records", post(medical_records::create_medical_record))
        .route("/medical-records/:id", get(medical_records::get_medical_record))
        .route("/medical-records/:id", put(medical_records::update_medical_record))
        .route("/medical-records/:id", delete(medical_records::delete_medical_record))
        // Invoices
        .route("/invoices", get(invoices::list_invoices))
        .route("/invoices", post(invoices::create_invoice))
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/invoices/:id", put(invoices::update_invoice))
        .route("/invoices/:id", delete(invoices::delete_invoice))
        .route("/invoices/:id/pay", post(invoices::pay_invoice))
        // Users (admin)
        .route("/users", get(users::list_users))
        .route("/users", post(users::create_user))
        .route("/users/:id", get(users::get_user))
        .route("/users/:id", put(users::update_user))
        .route("/users/:id", delete(users::delete_user))
        // Statistics (admin)
        .route("/statistics", get(statistics::get_statistics));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::test_support;

    async fn test_app() -> (Router, Arc<AppState>) {
        let pool = test_support::pool().await;
        let state = Arc::new(AppState::new(Config::default(), pool));
        (create_router(state.clone()), state)
    }

    fn bearer(state: &AppState, user_id: i64) -> String {
        let token = auth::issue_token(&state.config.auth.jwt_secret, 1, user_id).unwrap();
        format!("Bearer {}", token)
    }

    fn json_body(value: serde_json::Value) -> Body {
        Body::from(value.to_string())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_is_public() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_token() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(Request::get("/api/appointments").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn customer_cannot_complete_an_appointment() {
        let (app, state) = test_app().await;
        let user_id = test_support::insert_user(&state.db, "jane@example.com", "CUSTOMER").await;
        let customer_id = test_support::insert_customer(&state.db, "jane@example.com").await;
        let appointment_id =
            test_support::insert_appointment(&state.db, customer_id, "CONFIRMED").await;

        let response = app
            .oneshot(
                Request::post(format!("/api/appointments/{}/complete", appointment_id))
                    .header("Authorization", bearer(&state, user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn incomplete_json_body_gets_the_error_envelope() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(
                Request::post("/api/auth/register")
                    .header("Content-Type", "application/json")
                    .body(json_body(serde_json::json!({})))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn pet_creation_survives_user_customer_id_collision() {
        // Bob's customer row and Jane's user account share the numeric id 1;
        // Jane's new pet must land under her own customer record, not Bob's.
        let (app, state) = test_app().await;
        let bob = test_support::insert_customer(&state.db, "bob@example.com").await;
        let jane = test_support::insert_user(&state.db, "jane@example.com", "CUSTOMER").await;
        assert_eq!(bob, jane);

        let response = app
            .oneshot(
                Request::post("/api/pets")
                    .header("Authorization", bearer(&state, jane))
                    .header("Content-Type", "application/json")
                    .body(json_body(serde_json::json!({
                        "name": "Rex",
                        "species": "Dog",
                        "dateOfBirth": "2020-01-01",
                        "gender": "MALE",
                    })))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = body_json(response).await;
        assert_eq!(json["owner"]["email"], "jane@example.com");
    }

    #[tokio::test]
    async fn terminal_appointment_rejects_status_change_via_update() {
        let (app, state) = test_app().await;
        let desk = test_support::insert_user(&state.db, "desk@example.com", "RECEPTIONIST").await;
        let customer_id = test_support::insert_customer(&state.db, "owner@example.com").await;
        let appointment_id =
            test_support::insert_appointment(&state.db, customer_id, "COMPLETED").await;

        let response = app
            .oneshot(
                Request::put(format!("/api/appointments/{}", appointment_id))
                    .header("Authorization", bearer(&state, desk))
                    .header("Content-Type", "application/json")
                    .body(json_body(serde_json::json!({ "status": "CONFIRMED" })))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM appointments WHERE id = ?")
                .bind(appointment_id)
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(status, "COMPLETED");
    }

    #[tokio::test]
    async fn empty_prescriptions_list_clears_the_column() {
        let (app, state) = test_app().await;
        let vet = test_support::insert_user(&state.db, "vet@example.com", "VETERINARIAN").await;
        let owner = test_support::insert_customer(&state.db, "owner@example.com").await;
        let pet = test_support::insert_pet(&state.db, owner, "Rex").await;

        let now = crate::db::now_timestamp();
        let record_id = sqlx::query(
            "INSERT INTO medical_records
             (record_date, diagnosis, treatment, notes, prescriptions, pet_id, veterinarian_id, created_at, updated_at)
             VALUES ('2025-10-25', 'Otitis', 'Ear drops', '', 'Drops 2x daily', ?, ?, ?, ?)",
        )
        .bind(pet)
        .bind(vet)
        .bind(&now)
        .bind(&now)
        .execute(&state.db)
        .await
        .unwrap()
        .last_insert_rowid();

        let response = app
            .oneshot(
                Request::put(format!("/api/medical-records/{}", record_id))
                    .header("Authorization", bearer(&state, vet))
                    .header("Content-Type", "application/json")
                    .body(json_body(serde_json::json!({ "prescriptions": [] })))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert!(json["prescriptions"].is_null());
    }

    #[tokio::test]
    async fn veterinarian_completes_a_confirmed_appointment() {
        let (app, state) = test_app().await;
        let vet_id = test_support::insert_user(&state.db, "vet@example.com", "VETERINARIAN").await;
        let customer_id = test_support::insert_customer(&state.db, "owner@example.com").await;
        let appointment_id =
            test_support::insert_appointment(&state.db, customer_id, "CONFIRMED").await;

        let response = app
            .oneshot(
                Request::post(format!("/api/appointments/{}/complete", appointment_id))
                    .header("Authorization", bearer(&state, vet_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "COMPLETED");
    }
}
