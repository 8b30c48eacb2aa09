pub mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Current time in the storage format used for created_at/updated_at columns.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("vetr.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Initial schema
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory pool for tests. A single connection keeps every query on the
    /// same memory database.
    pub async fn pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .expect("pragma");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    pub async fn insert_user(pool: &DbPool, email: &str, role: &str) -> i64 {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO users (first_name, last_name, email, password_hash, role, created_at, updated_at)
             VALUES ('Test', 'User', ?, '$argon2id$test', ?, ?, ?)",
        )
        .bind(email)
        .bind(role)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .expect("insert user")
        .last_insert_rowid()
    }

    pub async fn insert_customer(pool: &DbPool, email: &str) -> i64 {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO customers (first_name, last_name, email, phone, address, created_at, updated_at)
             VALUES ('Test', 'Customer', ?, '', '', ?, ?)",
        )
        .bind(email)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .expect("insert customer")
        .last_insert_rowid()
    }

    pub async fn insert_pet(pool: &DbPool, owner_id: i64, name: &str) -> i64 {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO pets (name, species, breed, date_of_birth, gender, owner_id, created_at, updated_at)
             VALUES (?, 'Dog', 'Mixed', '2020-01-01', 'MALE', ?, ?, ?)",
        )
        .bind(name)
        .bind(owner_id)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .expect("insert pet")
        .last_insert_rowid()
    }

    pub async fn insert_appointment(pool: &DbPool, customer_id: i64, status: &str) -> i64 {
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO appointments (appointment_date, reason, status, customer_id, created_at, updated_at)
             VALUES ('2025-10-25T10:00', 'checkup', ?, ?, ?, ?)",
        )
        .bind(status)
        .bind(customer_id)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .expect("insert appointment")
        .last_insert_rowid()
    }
}
