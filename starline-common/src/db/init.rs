//! Database initialization
//!
//! Creates the database on first run, creates all tables idempotently,
//! applies migrations and default settings, then opens the working pool with
//! the configured busy timeout.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Busy timeout used until the settings table has been read
const BOOTSTRAP_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Bootstrap: single connection for schema work
    let bootstrap = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path, BOOTSTRAP_BUSY_TIMEOUT_MS)?)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&bootstrap).await?;

    let timeout_ms = setting_i64(&bootstrap, "database_lock_retry_ms")
        .await?
        .unwrap_or(250)
        .max(0) as u64;
    bootstrap.close().await;

    // Working pool: every connection gets foreign keys, WAL and the busy timeout
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(connect_options(db_path, timeout_ms)?)
        .await?;

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

fn connect_options(db_path: &Path, busy_timeout_ms: u64) -> Result<SqliteConnectOptions> {
    let db_url = format!("sqlite://{}", db_path.display());
    Ok(SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms)))
}

/// Create all tables, run migrations and ensure default settings
///
/// Idempotent; safe to call on every startup.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    create_interviews_table(pool).await?;
    create_questions_table(pool).await?;
    create_answers_table(pool).await?;
    create_ratings_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    init_default_settings(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime-tunable key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            tier TEXT NOT NULL DEFAULT 'free'
                CHECK (tier IN ('free', 'starter', 'premium')),
            free_answers_used INTEGER NOT NULL DEFAULT 0 CHECK (free_answers_used >= 0),
            free_interviews_used INTEGER NOT NULL DEFAULT 0 CHECK (free_interviews_used >= 0),
            starter_interviews_used INTEGER NOT NULL DEFAULT 0 CHECK (starter_interviews_used >= 0),
            starter_interview_credits INTEGER NOT NULL DEFAULT 0 CHECK (starter_interview_credits >= 0),
            starter_expires_at TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_interviews_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interviews (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            total_questions INTEGER NOT NULL CHECK (total_questions > 0),
            current_question_index INTEGER NOT NULL DEFAULT 0,
            furthest_question_index INTEGER NOT NULL DEFAULT 0,
            completed_question_count INTEGER NOT NULL DEFAULT 0,
            average_score REAL,
            state TEXT NOT NULL DEFAULT 'created'
                CHECK (state IN ('created', 'in_progress', 'completed')),
            entitlement_tier TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            CHECK (current_question_index >= 0 AND current_question_index < total_questions),
            CHECK (furthest_question_index >= current_question_index
                   AND furthest_question_index < total_questions)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_questions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            id TEXT PRIMARY KEY,
            interview_id TEXT NOT NULL REFERENCES interviews(id),
            ordinal INTEGER NOT NULL,
            competency TEXT NOT NULL,
            text TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            UNIQUE (interview_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_answers_table(pool: &SqlitePool) -> Result<()> {
    // One answer per question: enforced here, not by the application
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS answers (
            id TEXT PRIMARY KEY,
            interview_id TEXT NOT NULL REFERENCES interviews(id),
            question_id TEXT NOT NULL REFERENCES questions(id),
            text TEXT NOT NULL,
            time_spent_seconds INTEGER NOT NULL DEFAULT 0,
            answered_at TEXT NOT NULL,
            UNIQUE (interview_id, question_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ratings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ratings (
            id TEXT PRIMARY KEY,
            answer_id TEXT NOT NULL UNIQUE REFERENCES answers(id),
            overall_score REAL NOT NULL CHECK (overall_score >= 0 AND overall_score <= 10),
            competency_scores TEXT NOT NULL DEFAULT '{}',
            star_situation REAL NOT NULL,
            star_task REAL NOT NULL,
            star_action REAL NOT NULL,
            star_result REAL NOT NULL,
            feedback TEXT NOT NULL,
            strengths TEXT NOT NULL DEFAULT '[]',
            improvement_areas TEXT NOT NULL DEFAULT '[]',
            improved_answer TEXT NOT NULL,
            rated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist; NULL values are reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Total time a conflicting write keeps retrying before giving up
    ensure_setting(pool, "database_max_lock_wait_ms", "5000").await?;
    // SQLite busy_timeout per statement
    ensure_setting(pool, "database_lock_retry_ms", "250").await?;

    info!("Default settings initialized");
    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE tolerates concurrent initialization
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let reset = sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default_value)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    if reset > 0 {
        info!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Read an integer setting, `None` if missing or not numeric
pub async fn setting_i64(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    Ok(value.flatten().and_then(|v| v.trim().parse::<i64>().ok()))
}
