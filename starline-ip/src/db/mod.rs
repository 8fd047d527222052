//! Database access for starline-ip
//!
//! Query functions take either an executor (`&SqlitePool` or `&mut *tx`) for
//! single statements, or `&mut SqliteConnection` when they must run inside a
//! caller-owned transaction.

pub mod answers;
pub mod interviews;
pub mod questions;
pub mod ratings;
pub mod users;

use chrono::{DateTime, Utc};
use starline_common::{Error, Result};
use uuid::Uuid;

pub use starline_common::db::init_database;

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, column)).transpose()
}

/// SQLite INTEGER → u32, rejecting negatives
pub(crate) fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Internal(format!("Column {} out of range: {}", column, value)))
}
