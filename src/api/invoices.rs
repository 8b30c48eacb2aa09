//! Invoice endpoints. Billing is receptionist-driven and independent of any
//! appointment. The item list is authoritative for the total: the server
//! recomputes the sum on every item mutation and rejects a client-supplied
//! total that disagrees.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{
    now_timestamp, CreateInvoiceRequest, Customer, Invoice, InvoiceItem, InvoiceItemInput,
    InvoiceResponse, InvoiceStatus, Role, UpdateInvoiceRequest, User,
};
use crate::AppState;

use super::authz::{self, Action};
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::Json;
use super::validation;

/// Tolerance for comparing a supplied total against the recomputed item sum.
const AMOUNT_EPSILON: f64 = 0.005;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceFilter {
    pub customer_id: Option<i64>,
}

fn validate_items(items: &[InvoiceItemInput]) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    for (i, item) in items.iter().enumerate() {
        if item.description.trim().is_empty() {
            errors.add(format!("items[{}].description", i), "Description is required");
        }
        if let Err(e) = validation::validate_amount(item.unit_price, "unitPrice") {
            errors.add(format!("items[{}].unitPrice", i), e);
        }
        if let Err(e) = validation::validate_quantity(item.quantity) {
            errors.add(format!("items[{}].quantity", i), e);
        }
    }
    errors.finish()
}

/// The recomputed sum, checked against a supplied total when one is present.
fn resolve_total(
    items: &[InvoiceItemInput],
    supplied: Option<f64>,
) -> Result<f64, ApiError> {
    let computed: f64 = items.iter().map(|i| i.line_total()).sum();
    match supplied {
        Some(total) if (total - computed).abs() > AMOUNT_EPSILON => Err(ApiError::validation(
            format!(
                "totalAmount {:.2} does not match the sum of items {:.2}",
                total, computed
            ),
        )),
        Some(total) => Ok(total),
        None => Ok(computed),
    }
}

/// A total supplied without an item list must still agree with the item rows
/// already on file. Invoices with no items accept any total.
async fn ensure_total_matches_stored_items(
    pool: &crate::db::DbPool,
    invoice_id: i64,
    supplied: f64,
) -> Result<(), ApiError> {
    let (stored,): (Option<f64>,) =
        sqlx::query_as("SELECT SUM(total) FROM invoice_items WHERE invoice_id = ?")
            .bind(invoice_id)
            .fetch_one(pool)
            .await?;
    match stored {
        Some(sum) if (supplied - sum).abs() > AMOUNT_EPSILON => Err(ApiError::validation(format!(
            "totalAmount {:.2} does not match the sum of items {:.2}",
            supplied, sum
        ))),
        _ => Ok(()),
    }
}

async fn load_relations(
    pool: &crate::db::DbPool,
    invoice: Invoice,
) -> Result<InvoiceResponse, ApiError> {
    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ?")
        .bind(invoice.customer_id)
        .fetch_optional(pool)
        .await?;
    let items = sqlx::query_as::<_, InvoiceItem>(
        "SELECT * FROM invoice_items WHERE invoice_id = ? ORDER BY id",
    )
    .bind(invoice.id)
    .fetch_all(pool)
    .await?;
    Ok(InvoiceResponse {
        invoice,
        customer,
        items,
    })
}

pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(mut filter): Query<InvoiceFilter>,
) -> Result<Json<Vec<InvoiceResponse>>, ApiError> {
    authz::require(user.role_enum(), Action::ReadInvoices)?;

    if user.role_enum() == Role::Customer {
        match super::appointments::own_customer(&state.db, &user).await? {
            Some(customer) => filter.customer_id = Some(customer.id),
            None => return Ok(Json(Vec::new())),
        }
    }

    let invoices = sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices
         WHERE (? IS NULL OR customer_id = ?)
         ORDER BY invoice_date DESC",
    )
    .bind(filter.customer_id)
    .bind(filter.customer_id)
    .fetch_all(&state.db)
    .await?;

    let mut responses = Vec::with_capacity(invoices.len());
    for invoice in invoices {
        responses.push(load_relations(&state.db, invoice).await?);
    }
    Ok(Json(responses))
}

async fn fetch_scoped(state: &AppState, user: &User, id: i64) -> Result<Invoice, ApiError> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice not found"))?;

    if user.role_enum() == Role::Customer {
        let own = super::appointments::own_customer(&state.db, user).await?;
        if own.map(|c| c.id) != Some(invoice.customer_id) {
            return Err(ApiError::not_found("Invoice not found"));
        }
    }

    Ok(invoice)
}

pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ReadInvoices)?;

    let invoice = fetch_scoped(&state, &user, id).await?;
    Ok(Json(load_relations(&state.db, invoice).await?))
}

pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), ApiError> {
    authz::require(user.role_enum(), Action::CreateInvoice)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validation::validate_date(&req.invoice_date, "invoiceDate") {
        errors.add("invoiceDate", e);
    }
    if let Err(e) = validation::validate_date(&req.due_date, "dueDate") {
        errors.add("dueDate", e);
    }
    errors.finish()?;
    validate_items(&req.items)?;

    let customer: Option<Customer> = sqlx::query_as("SELECT * FROM customers WHERE id = ?")
        .bind(req.customer_id)
        .fetch_optional(&state.db)
        .await?;
    if customer.is_none() {
        return Err(ApiError::validation("Customer not found"));
    }

    let total = resolve_total(&req.items, req.total_amount)?;
    let status = req.status.unwrap_or(InvoiceStatus::Pending);
    let now = now_timestamp();

    // Invoice and items land together or not at all.
    let mut tx = state.db.begin().await?;

    let invoice_id = sqlx::query(
        "INSERT INTO invoices (invoice_date, due_date, total_amount, status, customer_id, notes, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&req.invoice_date)
    .bind(&req.due_date)
    .bind(total)
    .bind(status.as_str())
    .bind(req.customer_id)
    .bind(&req.notes)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for item in &req.items {
        sqlx::query(
            "INSERT INTO invoice_items (invoice_id, description, unit_price, quantity, total, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(invoice_id)
        .bind(&item.description)
        .bind(item.unit_price)
        .bind(item.quantity)
        .bind(item.line_total())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
        .bind(invoice_id)
        .fetch_one(&state.db)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(load_relations(&state.db, invoice).await?),
    ))
}

/// Update an invoice. A supplied item list replaces the existing items
/// wholesale and the total is recomputed from it.
pub async fn update_invoice(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
    Json(req): Json<UpdateInvoiceRequest>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    authz::require(user.role_enum(), Action::ManageInvoices)?;

    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice not found"))?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(date) = &req.invoice_date {
        if let Err(e) = validation::validate_date(date, "invoiceDate") {
            errors.add("invoiceDate", e);
        }
    }
    if let Some(date) = &req.due_date {
        if let Err(e) = validation::validate_date(date, "dueDate") {
            errors.add("dueDate", e);
        }
    }
    errors.finish()?;

    let total = match &req.items {
        Some(items) => {
            validate_items(items)?;
            Some(resolve_total(items, req.total_amount)?)
        }
        None => {
            // The stored items stay authoritative even when they are not
            // part of the update.
            if let Some(supplied) = req.total_amount {
                validation::validate_amount(supplied, "totalAmount")
                    .map_err(ApiError::validation)?;
                ensure_total_matches_stored_items(&state.db, invoice.id, supplied).await?;
            }
            req.total_amount
        }
    };

    let now = now_timestamp();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE invoices SET
            invoice_date = COALESCE(?, invoice_date),
            due_date = COALESCE(?, due_date),
            total_amount = COALESCE(?, total_amount),
            status = COALESCE(?, status),
            notes = COALESCE(?, notes),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(&req.invoice_date)
    .bind(&req.due_date)
    .bind(total)
    .bind(req.status.map(|s| s.as_str()))
    .bind(&req.notes)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if let Some(items) = &req.items {
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for item in items {
            sqlx::query(
                "INSERT INTO invoice_items (invoice_id, description, unit_price, quantity, total, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&item.description)
            .bind(item.unit_price)
            .bind(item.quantity)
            .bind(item.line_total())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    let updated = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
        .bind(invoice.id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(load_relations(&state.db, updated).await?))
}

/// Mark an invoice PAID. Customers may settle their own invoices; the front
/// desk may settle any.
pub async fn pay_invoice(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    authz::require(user.role_enum(), Action::PayInvoice)?;

    let invoice = fetch_scoped(&state, &user, id).await?;

    let current: InvoiceStatus = invoice
        .status
        .parse()
        .unwrap_or(InvoiceStatus::Pending);
    if current == InvoiceStatus::Cancelled {
        return Err(ApiError::validation("A cancelled invoice cannot be paid"));
    }

    sqlx::query("UPDATE invoices SET status = ?, updated_at = ? WHERE id = ?")
        .bind(InvoiceStatus::Paid.as_str())
        .bind(now_timestamp())
        .bind(invoice.id)
        .execute(&state.db)
        .await?;

    let updated = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
        .bind(invoice.id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(load_relations(&state.db, updated).await?))
}

/// Items go with the invoice (ON DELETE CASCADE).
pub async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authz::require(user.role_enum(), Action::ManageInvoices)?;

    let result = sqlx::query("DELETE FROM invoices WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Invoice not found"));
    }

    Ok(Json(
        serde_json::json!({ "message": "Invoice deleted successfully" }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(description: &str, unit_price: f64, quantity: i64) -> InvoiceItemInput {
        InvoiceItemInput {
            description: description.to_string(),
            unit_price,
            quantity,
        }
    }

    #[test]
    fn total_is_computed_from_items_when_absent() {
        let items = vec![item("Consultation", 50.0, 1), item("Vaccine", 23.5, 2)];
        assert_eq!(resolve_total(&items, None).unwrap(), 97.0);
    }

    #[test]
    fn matching_supplied_total_is_accepted() {
        let items = vec![item("Consultation", 50.0, 1)];
        assert_eq!(resolve_total(&items, Some(50.0)).unwrap(), 50.0);
    }

    #[test]
    fn mismatched_supplied_total_is_rejected() {
        let items = vec![item("Consultation", 50.0, 1)];
        assert!(resolve_total(&items, Some(60.0)).is_err());
    }

    #[tokio::test]
    async fn persisted_items_sum_to_the_stored_total() {
        let pool = crate::db::test_support::pool().await;
        let customer_id =
            crate::db::test_support::insert_customer(&pool, "billing@example.com").await;

        let items = vec![item("Consultation", 50.0, 1), item("Vaccine", 23.5, 2)];
        let total = resolve_total(&items, None).unwrap();
        let now = now_timestamp();

        let invoice_id = sqlx::query(
            "INSERT INTO invoices (invoice_date, due_date, total_amount, status, customer_id, created_at, updated_at)
             VALUES ('2025-10-25', '2025-11-25', ?, 'PENDING', ?, ?, ?)",
        )
        .bind(total)
        .bind(customer_id)
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        for i in &items {
            sqlx::query(
                "INSERT INTO invoice_items (invoice_id, description, unit_price, quantity, total, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(invoice_id)
            .bind(&i.description)
            .bind(i.unit_price)
            .bind(i.quantity)
            .bind(i.line_total())
            .bind(&now)
            .execute(&pool)
            .await
            .unwrap();
        }

        let (stored_total,): (f64,) =
            sqlx::query_as("SELECT total_amount FROM invoices WHERE id = ?")
                .bind(invoice_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        let (item_sum,): (f64,) =
            sqlx::query_as("SELECT SUM(total) FROM invoice_items WHERE invoice_id = ?")
                .bind(invoice_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!((stored_total - item_sum).abs() < AMOUNT_EPSILON);
        assert_eq!(stored_total, 97.0);
    }

    #[tokio::test]
    async fn itemless_total_must_agree_with_stored_items() {
        let pool = crate::db::test_support::pool().await;
        let customer_id =
            crate::db::test_support::insert_customer(&pool, "billing@example.com").await;
        let now = now_timestamp();

        let invoice_id = sqlx::query(
            "INSERT INTO invoices (invoice_date, due_date, total_amount, status, customer_id, created_at, updated_at)
             VALUES ('2025-10-25', '2025-11-25', 97.0, 'PENDING', ?, ?, ?)",
        )
        .bind(customer_id)
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        for i in [item("Consultation", 50.0, 1), item("Vaccine", 23.5, 2)] {
            sqlx::query(
                "INSERT INTO invoice_items (invoice_id, description, unit_price, quantity, total, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(invoice_id)
            .bind(&i.description)
            .bind(i.unit_price)
            .bind(i.quantity)
            .bind(i.line_total())
            .bind(&now)
            .execute(&pool)
            .await
            .unwrap();
        }

        assert!(ensure_total_matches_stored_items(&pool, invoice_id, 97.0)
            .await
            .is_ok());
        assert!(ensure_total_matches_stored_items(&pool, invoice_id, 120.0)
            .await
            .is_err());

        // An invoice with no items on file accepts any total.
        let bare_id = sqlx::query(
            "INSERT INTO invoices (invoice_date, due_date, total_amount, status, customer_id, created_at, updated_at)
             VALUES ('2025-10-25', '2025-11-25', 0.0, 'PENDING', ?, ?, ?)",
        )
        .bind(customer_id)
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();
        assert!(ensure_total_matches_stored_items(&pool, bare_id, 55.0)
            .await
            .is_ok());
    }

    #[test]
    fn item_validation_catches_bad_rows() {
        assert!(validate_items(&[item("", 50.0, 1)]).is_err());
        assert!(validate_items(&[item("Vaccine", -1.0, 1)]).is_err());
        assert!(validate_items(&[item("Vaccine", 10.0, 0)]).is_err());
        assert!(validate_items(&[item("Vaccine", 10.0, 2)]).is_ok());
    }
}
