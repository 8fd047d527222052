//! Question persistence (questions are immutable once generated)

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use starline_common::db::Question;
use starline_common::Result;
use uuid::Uuid;

use super::{parse_uuid, to_u32};

fn question_from_row(row: &SqliteRow) -> Result<Question> {
    let id: String = row.get("id");
    let interview_id: String = row.get("interview_id");
    let difficulty: String = row.get("difficulty");

    Ok(Question {
        id: parse_uuid(&id, "questions.id")?,
        interview_id: parse_uuid(&interview_id, "questions.interview_id")?,
        ordinal: to_u32(row.get("ordinal"), "ordinal")?,
        competency: row.get("competency"),
        text: row.get("text"),
        difficulty: difficulty.parse()?,
    })
}

pub async fn insert_question<'e, E>(executor: E, question: &Question) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO questions (id, interview_id, ordinal, competency, text, difficulty)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(question.id.to_string())
    .bind(question.interview_id.to_string())
    .bind(question.ordinal as i64)
    .bind(&question.competency)
    .bind(&question.text)
    .bind(question.difficulty.as_str())
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn load_question<'e, E>(executor: E, question_id: Uuid) -> Result<Option<Question>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, interview_id, ordinal, competency, text, difficulty FROM questions WHERE id = ?",
    )
    .bind(question_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(question_from_row).transpose()
}

/// All questions of an interview in ordinal order
pub async fn list_questions<'e, E>(executor: E, interview_id: Uuid) -> Result<Vec<Question>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, interview_id, ordinal, competency, text, difficulty
        FROM questions
        WHERE interview_id = ?
        ORDER BY ordinal
        "#,
    )
    .bind(interview_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(question_from_row).collect()
}
