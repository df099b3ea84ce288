use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::error::Error;
use crate::quizzes::{self, QuestionRow};

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttemptRow {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub score: f64,
    pub submitted_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmittedAnswer {
    pub question_id: i64,
    pub answer_text: String,
}

/// A submitted answer scores when it equals the stored answer key after
/// trimming surrounding whitespace. No partial credit, case matters.
fn is_correct(submitted: &str, key: &str) -> bool {
    submitted.trim() == key.trim()
}

/// Score one submission.
///
/// Enforces the attempt limit (`max_attempts` of 0 means unlimited), then
/// writes the attempt, its answer rows and the final score in one
/// transaction. Answers referencing questions outside this quiz are silently
/// discarded, tolerating stale client payloads.
pub async fn submit(
    db: &SqlitePool,
    quiz_id: i64,
    user_id: i64,
    answers: Vec<SubmittedAnswer>,
) -> Result<AttemptRow, Error> {
    let quiz = quizzes::get_quiz(db, quiz_id).await?;
    let now = OffsetDateTime::now_utc();

    // The count check runs inside the write transaction: SQLite's single
    // writer serializes concurrent submissions, so the limit holds.
    let mut tx = db.begin().await.map_err(anyhow::Error::from)?;
    if quiz.max_attempts > 0 {
        let prior: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM quiz_attempt WHERE quiz_id = ? AND user_id = ?",
        )
        .bind(quiz_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if prior >= quiz.max_attempts {
            return Err(Error::AttemptLimitExceeded);
        }
    }

    let attempt_id = sqlx::query(
        "INSERT INTO quiz_attempt (quiz_id, user_id, score, submitted_at) VALUES (?, ?, 0, ?)",
    )
    .bind(quiz_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let mut total_score = 0.0;
    for answer in &answers {
        let question = sqlx::query_as::<_, QuestionRow>(
            "SELECT * FROM question WHERE id = ? AND quiz_id = ?",
        )
        .bind(answer.question_id)
        .bind(quiz_id)
        .fetch_optional(&mut *tx)
        .await?;
        // unknown or foreign question id: skip, do not fail the submission
        let Some(question) = question else { continue };
        sqlx::query("INSERT INTO user_answer (attempt_id, question_id, answer_text) VALUES (?, ?, ?)")
            .bind(attempt_id)
            .bind(question.id)
            .bind(&answer.answer_text)
            .execute(&mut *tx)
            .await?;
        if is_correct(&answer.answer_text, &question.answer) {
            total_score += question.points;
        }
    }

    sqlx::query("UPDATE quiz_attempt SET score = ? WHERE id = ?")
        .bind(total_score)
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    let attempt = sqlx::query_as::<_, AttemptRow>("SELECT * FROM quiz_attempt WHERE id = ?")
        .bind(attempt_id)
        .fetch_one(db)
        .await?;
    Ok(attempt)
}

/// 1-based ordinal of this attempt among all attempts by the same
/// (quiz, user) pair, in submission order (id breaks ties).
pub async fn attempt_number(db: &SqlitePool, attempt: &AttemptRow) -> Result<i64, Error> {
    let earlier: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quiz_attempt \
         WHERE quiz_id = ? AND user_id = ? \
           AND (submitted_at < ? OR (submitted_at = ? AND id <= ?))",
    )
    .bind(attempt.quiz_id)
    .bind(attempt.user_id)
    .bind(attempt.submitted_at)
    .bind(attempt.submitted_at)
    .bind(attempt.id)
    .fetch_one(db)
    .await?;
    Ok(earlier)
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttemptHistoryEntry {
    pub quiz_title: String,
    pub score: f64,
    pub submitted_at: OffsetDateTime,
}

/// All of a user's attempts, newest first.
pub async fn history(db: &SqlitePool, user_id: i64) -> Result<Vec<AttemptHistoryEntry>, Error> {
    let rows = sqlx::query_as::<_, AttemptHistoryEntry>(
        "SELECT q.title AS quiz_title, a.score, a.submitted_at \
         FROM quiz_attempt a JOIN quiz q ON q.id = a.quiz_id \
         WHERE a.user_id = ? ORDER BY a.submitted_at DESC, a.id DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttemptReport {
    pub id: i64,
    pub user_id: i64,
    pub student_name: String,
    pub score: f64,
    pub submitted_at: OffsetDateTime,
    pub attempt_number: i64,
}

/// Teacher view of every attempt on a quiz, newest first.
pub async fn list_for_quiz(db: &SqlitePool, quiz_id: i64) -> Result<Vec<AttemptReport>, Error> {
    let rows = sqlx::query_as::<_, AttemptReport>(
        "SELECT a.id, a.user_id, u.full_name AS student_name, a.score, a.submitted_at, \
                (SELECT COUNT(*) FROM quiz_attempt b \
                 WHERE b.quiz_id = a.quiz_id AND b.user_id = a.user_id \
                   AND (b.submitted_at < a.submitted_at \
                        OR (b.submitted_at = a.submitted_at AND b.id <= a.id))) AS attempt_number \
         FROM quiz_attempt a JOIN user u ON u.id = a.user_id \
         WHERE a.quiz_id = ? ORDER BY a.submitted_at DESC, a.id DESC",
    )
    .bind(quiz_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}
