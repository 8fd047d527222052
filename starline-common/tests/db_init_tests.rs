//! Unit tests for database initialization
//!
//! Tests cover:
//! - Automatic database creation on first run
//! - Re-opening an existing database
//! - Default settings and schema version
//! - Uniqueness constraints backing the pipeline invariants

use starline_common::db::init::{init_database, setting_i64};
use starline_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("starline.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("starline.db");

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());
    pool1.unwrap().close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("starline.db")).await.unwrap();

    assert_eq!(setting_i64(&pool, "database_max_lock_wait_ms").await.unwrap(), Some(5000));
    assert_eq!(setting_i64(&pool, "database_lock_retry_ms").await.unwrap(), Some(250));
    assert_eq!(setting_i64(&pool, "no_such_setting").await.unwrap(), None);
}

#[tokio::test]
async fn test_null_setting_reset_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("starline.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'database_max_lock_wait_ms'")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    assert_eq!(setting_i64(&pool, "database_max_lock_wait_ms").await.unwrap(), Some(5000));
}

#[tokio::test]
async fn test_schema_version_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("starline.db")).await.unwrap();

    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

    let versions: Vec<i32> = sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(versions, vec![1, 2]);

    let indexes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name IN ('idx_interviews_user', 'idx_answers_interview')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(indexes, 2);
}

#[tokio::test]
async fn test_answer_uniqueness_enforced_by_schema() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("starline.db")).await.unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query("INSERT INTO users (id, created_at, updated_at) VALUES ('u1', ?, ?)")
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO interviews (id, user_id, total_questions, entitlement_tier, started_at)
         VALUES ('i1', 'u1', 2, 'free', ?)",
    )
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO questions (id, interview_id, ordinal, competency, text, difficulty)
         VALUES ('q1', 'i1', 0, 'leadership', 'Tell me about a time...', 'medium')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let insert_answer = |id: &'static str| {
        sqlx::query(
            "INSERT INTO answers (id, interview_id, question_id, text, answered_at)
             VALUES (?, 'i1', 'q1', 'answer', ?)",
        )
        .bind(id)
        .bind(now.clone())
    };

    insert_answer("a1").execute(&pool).await.unwrap();
    let second = insert_answer("a2").execute(&pool).await;
    assert!(second.is_err(), "Second answer for the same question must be rejected");
}

#[tokio::test]
async fn test_foreign_keys_enabled_on_every_connection() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("starline.db")).await.unwrap();

    for _ in 0..3 {
        let mut conn = pool.acquire().await.unwrap();
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
