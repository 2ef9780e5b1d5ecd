pub mod repository;
pub mod sqlite;

pub use repository::*;
pub use sqlite::*;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Classify a failed write: unique-index violations become `DuplicateKey`.
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                DatabaseError::DuplicateKey(msg.clone().unwrap_or_else(|| code.to_string()))
            }
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::ConstraintViolation(msg.clone().unwrap_or_else(|| code.to_string()))
            }
            _ => DatabaseError::Sqlite(err),
        }
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Render a timestamp in the sortable form stored in every `*_at` / `date_time` column.
/// Fixed millisecond precision keeps lexical and chronological order equal.
pub fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn ts_from_sql(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidTimestamp(raw.to_string()))
}

pub fn date_from_sql(raw: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| DatabaseError::InvalidTimestamp(raw.to_string()))
}
