use std::{str::FromStr, time::Duration};

use sha2::{Digest, Sha256};
use sqlx::{SqlitePool, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions}};
use uuid::Uuid;

use crate::{config::Config, error::AppError};

pub async fn connect_and_bootstrap(config: &Config) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(AppError::internal)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    bootstrap_schema(&pool).await?;

    Ok(pool)
}

const SCHEMA_BOOTSTRAP_SQL: &[&str] = &[
    "PRAGMA foreign_keys = ON;",

    "CREATE TABLE IF NOT EXISTS booking_requests (
      id TEXT PRIMARY KEY,
      business_id TEXT NOT NULL,
      contact_name TEXT NOT NULL,
      contact_email TEXT NOT NULL,
      event_id TEXT,
      requested_date DATETIME,
      notes TEXT,
      status TEXT NOT NULL,
      rejection_reason TEXT,
      processed_at DATETIME,
      processed_by TEXT,
      created_at DATETIME NOT NULL,
      updated_at DATETIME NOT NULL
    );",

    "CREATE TABLE IF NOT EXISTS opportunities (
      id TEXT PRIMARY KEY,
      business_id TEXT NOT NULL,
      title TEXT NOT NULL,
      stage TEXT NOT NULL,
      has_request INTEGER NOT NULL DEFAULT 0,
      request_id TEXT,
      created_at DATETIME NOT NULL,
      updated_at DATETIME NOT NULL,
      FOREIGN KEY(request_id) REFERENCES booking_requests(id) ON DELETE SET NULL
    );",

    "CREATE TABLE IF NOT EXISTS sales_tasks (
      id TEXT PRIMARY KEY,
      opportunity_id TEXT NOT NULL,
      category TEXT NOT NULL,
      note TEXT NOT NULL,
      due_at DATETIME NOT NULL,
      completed_at DATETIME,
      created_at DATETIME NOT NULL,
      FOREIGN KEY(opportunity_id) REFERENCES opportunities(id) ON DELETE CASCADE
    );",

    "CREATE INDEX IF NOT EXISTS idx_booking_requests_status
      ON booking_requests(status);",
    "CREATE INDEX IF NOT EXISTS idx_opportunities_request
      ON opportunities(request_id, has_request);",
    "CREATE INDEX IF NOT EXISTS idx_sales_tasks_opportunity
      ON sales_tasks(opportunity_id);",
];

async fn bootstrap_schema(pool: &SqlitePool) -> Result<(), AppError> {
    for statement in SCHEMA_BOOTSTRAP_SQL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
