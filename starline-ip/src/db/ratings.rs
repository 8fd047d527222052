//! Rating persistence
//!
//! At most one rating per answer (UNIQUE answer_id). List-valued fields are
//! stored as JSON TEXT.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection};
use starline_common::db::{Rating, StarBreakdown};
use starline_common::{Error, Result};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};

const RATING_COLUMNS: &str = r#"
    id, answer_id, overall_score, competency_scores,
    star_situation, star_task, star_action, star_result,
    feedback, strengths, improvement_areas, improved_answer, rated_at
"#;

fn json_column<T: serde::de::DeserializeOwned>(value: &str, column: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", column, e)))
}

fn rating_from_row(row: &SqliteRow) -> Result<Rating> {
    let id: String = row.get("id");
    let answer_id: String = row.get("answer_id");
    let competency_scores: String = row.get("competency_scores");
    let strengths: String = row.get("strengths");
    let improvement_areas: String = row.get("improvement_areas");
    let rated_at: String = row.get("rated_at");

    Ok(Rating {
        id: parse_uuid(&id, "ratings.id")?,
        answer_id: parse_uuid(&answer_id, "ratings.answer_id")?,
        overall_score: row.get("overall_score"),
        competency_scores: json_column(&competency_scores, "competency_scores")?,
        star_breakdown: StarBreakdown {
            situation: row.get("star_situation"),
            task: row.get("star_task"),
            action: row.get("star_action"),
            result: row.get("star_result"),
        },
        feedback: row.get("feedback"),
        strengths: json_column(&strengths, "strengths")?,
        improvement_areas: json_column(&improvement_areas, "improvement_areas")?,
        improved_answer: row.get("improved_answer"),
        rated_at: parse_timestamp(&rated_at, "ratings.rated_at")?,
    })
}

/// Insert a rating; false if the answer already has one
pub async fn insert_rating(conn: &mut SqliteConnection, rating: &Rating) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO ratings (
            id, answer_id, overall_score, competency_scores,
            star_situation, star_task, star_action, star_result,
            feedback, strengths, improvement_areas, improved_answer, rated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (answer_id) DO NOTHING
        "#,
    )
    .bind(rating.id.to_string())
    .bind(rating.answer_id.to_string())
    .bind(rating.overall_score)
    .bind(to_json(&rating.competency_scores, "competency_scores")?)
    .bind(rating.star_breakdown.situation)
    .bind(rating.star_breakdown.task)
    .bind(rating.star_breakdown.action)
    .bind(rating.star_breakdown.result)
    .bind(&rating.feedback)
    .bind(to_json(&rating.strengths, "strengths")?)
    .bind(to_json(&rating.improvement_areas, "improvement_areas")?)
    .bind(&rating.improved_answer)
    .bind(rating.rated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_rating_for_answer<'e, E>(executor: E, answer_id: Uuid) -> Result<Option<Rating>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM ratings WHERE answer_id = ?", RATING_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(answer_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(rating_from_row).transpose()
}

/// All ratings of an interview
pub async fn list_ratings_for_interview<'e, E>(
    executor: E,
    interview_id: Uuid,
) -> Result<Vec<Rating>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"
        SELECT {}
        FROM ratings
        WHERE answer_id IN (SELECT id FROM answers WHERE interview_id = ?)
        "#,
        RATING_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(interview_id.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter().map(rating_from_row).collect()
}
