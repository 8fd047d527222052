//! Interview aggregate persistence
//!
//! State transitions are conditional updates so that concurrent callers
//! learn from `rows_affected` whether they performed the transition.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection};
use starline_common::db::Interview;
use starline_common::Result;
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, to_u32};

const INTERVIEW_COLUMNS: &str = r#"
    id, user_id, total_questions, current_question_index, furthest_question_index,
    completed_question_count, average_score, state, entitlement_tier, started_at, completed_at
"#;

fn interview_from_row(row: &SqliteRow) -> Result<Interview> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let state: String = row.get("state");
    let entitlement_tier: String = row.get("entitlement_tier");
    let started_at: String = row.get("started_at");

    Ok(Interview {
        id: parse_uuid(&id, "interviews.id")?,
        user_id: parse_uuid(&user_id, "interviews.user_id")?,
        total_questions: to_u32(row.get("total_questions"), "total_questions")?,
        current_question_index: to_u32(
            row.get("current_question_index"),
            "current_question_index",
        )?,
        furthest_question_index: to_u32(
            row.get("furthest_question_index"),
            "furthest_question_index",
        )?,
        completed_question_count: to_u32(
            row.get("completed_question_count"),
            "completed_question_count",
        )?,
        average_score: row.get("average_score"),
        state: state.parse()?,
        entitlement_tier: entitlement_tier.parse()?,
        started_at: parse_timestamp(&started_at, "interviews.started_at")?,
        completed_at: parse_optional_timestamp(row.get("completed_at"), "completed_at")?,
    })
}

pub async fn insert_interview<'e, E>(executor: E, interview: &Interview) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO interviews (
            id, user_id, total_questions, current_question_index, furthest_question_index,
            completed_question_count, average_score, state, entitlement_tier,
            started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(interview.id.to_string())
    .bind(interview.user_id.to_string())
    .bind(interview.total_questions as i64)
    .bind(interview.current_question_index as i64)
    .bind(interview.furthest_question_index as i64)
    .bind(interview.completed_question_count as i64)
    .bind(interview.average_score)
    .bind(interview.state.as_str())
    .bind(interview.entitlement_tier.as_str())
    .bind(interview.started_at.to_rfc3339())
    .bind(interview.completed_at.map(|t| t.to_rfc3339()))
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn load_interview<'e, E>(executor: E, interview_id: Uuid) -> Result<Option<Interview>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM interviews WHERE id = ?", INTERVIEW_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(interview_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(interview_from_row).transpose()
}

/// Compare-and-set the current index; raises the high-water mark as needed.
///
/// Returns false if the index is no longer `expected`.
pub async fn set_question_index(
    conn: &mut SqliteConnection,
    interview_id: Uuid,
    expected: u32,
    new_index: u32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE interviews
        SET current_question_index = ?,
            furthest_question_index = MAX(furthest_question_index, ?)
        WHERE id = ? AND current_question_index = ?
        "#,
    )
    .bind(new_index as i64)
    .bind(new_index as i64)
    .bind(interview_id.to_string())
    .bind(expected as i64)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Created → InProgress. Returns true if this call made the transition.
pub async fn mark_in_progress(conn: &mut SqliteConnection, interview_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE interviews SET state = 'in_progress' WHERE id = ? AND state = 'created'",
    )
    .bind(interview_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn increment_completed_count(
    conn: &mut SqliteConnection,
    interview_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE interviews SET completed_question_count = completed_question_count + 1 WHERE id = ?",
    )
    .bind(interview_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

const AVERAGE_SCORE_SQL: &str = r#"
    (SELECT AVG(r.overall_score)
     FROM ratings r JOIN answers a ON a.id = r.answer_id
     WHERE a.interview_id = interviews.id)
"#;

/// Any non-terminal state → Completed, computing the average over existing
/// ratings. Returns true if this call made the transition.
pub async fn try_complete(conn: &mut SqliteConnection, interview_id: Uuid) -> Result<bool> {
    let sql = format!(
        r#"
        UPDATE interviews
        SET state = 'completed',
            completed_at = ?,
            average_score = {}
        WHERE id = ? AND state <> 'completed'
        "#,
        AVERAGE_SCORE_SQL
    );
    let result = sqlx::query(&sql)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(interview_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Recompute the average of a completed interview (late rating)
pub async fn refresh_average(conn: &mut SqliteConnection, interview_id: Uuid) -> Result<()> {
    let sql = format!(
        "UPDATE interviews SET average_score = {} WHERE id = ? AND state = 'completed'",
        AVERAGE_SCORE_SQL
    );
    sqlx::query(&sql)
        .bind(interview_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}
