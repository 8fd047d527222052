//! User and entitlement counter persistence
//!
//! Counter writes are version-checked: `update_user` fails with
//! `Error::Conflict` when the row changed since it was read.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection};
use starline_common::db::User;
use starline_common::{Error, Result};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, to_u32};

const USER_COLUMNS: &str = r#"
    id, tier, free_answers_used, free_interviews_used, starter_interviews_used,
    starter_interview_credits, starter_expires_at, version, created_at, updated_at
"#;

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let tier: String = row.get("tier");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(User {
        id: parse_uuid(&id, "users.id")?,
        tier: tier.parse()?,
        free_answers_used: to_u32(row.get("free_answers_used"), "free_answers_used")?,
        free_interviews_used: to_u32(row.get("free_interviews_used"), "free_interviews_used")?,
        starter_interviews_used: to_u32(
            row.get("starter_interviews_used"),
            "starter_interviews_used",
        )?,
        starter_interview_credits: to_u32(
            row.get("starter_interview_credits"),
            "starter_interview_credits",
        )?,
        starter_expires_at: parse_optional_timestamp(
            row.get("starter_expires_at"),
            "starter_expires_at",
        )?,
        version: row.get("version"),
        created_at: parse_timestamp(&created_at, "users.created_at")?,
        updated_at: parse_timestamp(&updated_at, "users.updated_at")?,
    })
}

/// Insert a new user
pub async fn insert_user<'e, E>(executor: E, user: &User) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO users (
            id, tier, free_answers_used, free_interviews_used, starter_interviews_used,
            starter_interview_credits, starter_expires_at, version, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.id.to_string())
    .bind(user.tier.as_str())
    .bind(user.free_answers_used as i64)
    .bind(user.free_interviews_used as i64)
    .bind(user.starter_interviews_used as i64)
    .bind(user.starter_interview_credits as i64)
    .bind(user.starter_expires_at.map(|t| t.to_rfc3339()))
    .bind(user.version)
    .bind(user.created_at.to_rfc3339())
    .bind(user.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

/// Load a user by id
pub async fn load_user<'e, E>(executor: E, user_id: Uuid) -> Result<Option<User>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

/// Write tier, counters and expiry if the row is still at `user.version`.
///
/// On success the stored version becomes `user.version + 1`.
pub async fn update_user(conn: &mut SqliteConnection, user: &User) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE users SET
            tier = ?,
            free_answers_used = ?,
            free_interviews_used = ?,
            starter_interviews_used = ?,
            starter_interview_credits = ?,
            starter_expires_at = ?,
            version = version + 1,
            updated_at = ?
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(user.tier.as_str())
    .bind(user.free_answers_used as i64)
    .bind(user.free_interviews_used as i64)
    .bind(user.starter_interviews_used as i64)
    .bind(user.starter_interview_credits as i64)
    .bind(user.starter_expires_at.map(|t| t.to_rfc3339()))
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(user.id.to_string())
    .bind(user.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "user {} changed since version {}",
            user.id, user.version
        )));
    }

    Ok(())
}
