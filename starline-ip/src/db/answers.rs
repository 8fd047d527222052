//! Answer persistence
//!
//! Uniqueness per (interview, question) is enforced by the table; inserts
//! report whether they created the row instead of failing on a duplicate.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection};
use starline_common::db::Answer;
use starline_common::Result;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, to_u32};

fn answer_from_row(row: &SqliteRow) -> Result<Answer> {
    let id: String = row.get("id");
    let interview_id: String = row.get("interview_id");
    let question_id: String = row.get("question_id");
    let answered_at: String = row.get("answered_at");

    Ok(Answer {
        id: parse_uuid(&id, "answers.id")?,
        interview_id: parse_uuid(&interview_id, "answers.interview_id")?,
        question_id: parse_uuid(&question_id, "answers.question_id")?,
        text: row.get("text"),
        time_spent_seconds: to_u32(row.get("time_spent_seconds"), "time_spent_seconds")?,
        answered_at: parse_timestamp(&answered_at, "answers.answered_at")?,
    })
}

/// Insert an answer; false if one already exists for this question
pub async fn insert_answer(conn: &mut SqliteConnection, answer: &Answer) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO answers (id, interview_id, question_id, text, time_spent_seconds, answered_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (interview_id, question_id) DO NOTHING
        "#,
    )
    .bind(answer.id.to_string())
    .bind(answer.interview_id.to_string())
    .bind(answer.question_id.to_string())
    .bind(&answer.text)
    .bind(answer.time_spent_seconds as i64)
    .bind(answer.answered_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_answer<'e, E>(executor: E, answer_id: Uuid) -> Result<Option<Answer>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, interview_id, question_id, text, time_spent_seconds, answered_at
        FROM answers WHERE id = ?
        "#,
    )
    .bind(answer_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(answer_from_row).transpose()
}

/// The answer stored for a question, if any
pub async fn find_answer<'e, E>(
    executor: E,
    interview_id: Uuid,
    question_id: Uuid,
) -> Result<Option<Answer>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, interview_id, question_id, text, time_spent_seconds, answered_at
        FROM answers WHERE interview_id = ? AND question_id = ?
        "#,
    )
    .bind(interview_id.to_string())
    .bind(question_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(answer_from_row).transpose()
}

/// Whether the question at `ordinal` has an answer
pub async fn is_answered<'e, E>(executor: E, interview_id: Uuid, ordinal: u32) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM answers a JOIN questions q ON q.id = a.question_id
        WHERE a.interview_id = ? AND q.ordinal = ?
        "#,
    )
    .bind(interview_id.to_string())
    .bind(ordinal as i64)
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

pub async fn count_answers<'e, E>(executor: E, interview_id: Uuid) -> Result<u32>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE interview_id = ?")
        .bind(interview_id.to_string())
        .fetch_one(executor)
        .await?;

    to_u32(count, "answer count")
}
