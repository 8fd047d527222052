//! Common error types for Starline

use thiserror::Error;

/// Common result type for Starline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Starline services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Optimistic concurrency check failed (row changed since it was read)
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that go away when the transaction is simply run again:
    /// SQLite busy/locked errors and optimistic version misses.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Database(db_err) => is_busy(db_err),
            _ => false,
        }
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes (e.g. 517 BUSY_SNAPSHOT)
fn is_busy(err: &sqlx::Error) -> bool {
    if let Some(db_err) = err.as_database_error() {
        if let Some(code) = db_err.code() {
            if let Ok(code) = code.parse::<i32>() {
                let primary = code & 0xff;
                if primary == 5 || primary == 6 {
                    return true;
                }
            }
        }
    }
    let message = err.to_string();
    message.contains("database is locked") || message.contains("database table is locked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_transient() {
        assert!(Error::Conflict("users row changed".to_string()).is_transient());
    }

    #[test]
    fn test_not_found_is_not_transient() {
        assert!(!Error::NotFound("user".to_string()).is_transient());
        assert!(!Error::Internal("database is locked".to_string()).is_transient());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
