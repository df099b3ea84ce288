use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::auth::{Action, Role};
use crate::error::Error;

/// Question payload as supplied by clients and by the AI extraction
/// pipeline. `order` is the wire name for the display position.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionSpec {
    pub text: String,
    pub options: Vec<String>,
    pub answer: String,
    #[serde(default = "default_points")]
    pub points: f64,
    #[serde(rename = "order", default)]
    pub position: i64,
}

fn default_points() -> f64 {
    1.0
}

impl QuestionSpec {
    /// The answer key must be one of the listed options.
    pub fn validate(&self) -> Result<(), Error> {
        if self.options.len() < 2 {
            return Err(Error::validation("a question needs at least 2 options"));
        }
        if !self.options.iter().any(|o| o == &self.answer) {
            return Err(Error::validation(format!(
                "answer '{}' is not among the question's options",
                self.answer
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct QuizRow {
    pub id: i64,
    pub class_id: i64,
    pub created_by: i64,
    pub title: String,
    pub description: Option<String>,
    pub total_questions: i64,
    pub max_score: f64,
    pub max_attempts: i64,
    pub duration_minutes: i64,
    pub deadline: Option<OffsetDateTime>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub quiz_id: i64,
    pub text: String,
    pub position: i64,
    pub points: f64,
    pub options: String,
    pub answer: String,
}

/// Full question view (teacher-facing: includes the answer key).
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionFull {
    pub id: i64,
    pub text: String,
    #[serde(rename = "order")]
    pub position: i64,
    pub points: f64,
    pub options: Vec<String>,
    pub answer: String,
}

/// Student-facing question view: no answer key.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionPublic {
    pub id: i64,
    pub text: String,
    #[serde(rename = "order")]
    pub position: i64,
    pub points: f64,
    pub options: Vec<String>,
}

impl QuestionRow {
    fn decode_options(&self) -> Result<Vec<String>, Error> {
        serde_json::from_str(&self.options)
            .map_err(|e| Error::Internal(anyhow::anyhow!("stored options unreadable: {e}")))
    }

    pub fn into_full(self) -> Result<QuestionFull, Error> {
        let options = self.decode_options()?;
        Ok(QuestionFull {
            id: self.id,
            text: self.text,
            position: self.position,
            points: self.points,
            options,
            answer: self.answer,
        })
    }

    pub fn into_public(self) -> Result<QuestionPublic, Error> {
        let options = self.decode_options()?;
        Ok(QuestionPublic {
            id: self.id,
            text: self.text,
            position: self.position,
            points: self.points,
            options,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewQuiz {
    pub class_id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    pub duration_minutes: i64,
    pub deadline: Option<OffsetDateTime>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub questions: Vec<QuestionSpec>,
}

fn default_max_attempts() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct QuizUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub max_attempts: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub deadline: Option<OffsetDateTime>,
    pub is_active: Option<bool>,
    /// When present, the whole question set is replaced.
    pub questions: Option<Vec<QuestionSpec>>,
}

async fn insert_questions(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    quiz_id: i64,
    questions: &[QuestionSpec],
) -> Result<(), Error> {
    for q in questions {
        let options = serde_json::to_string(&q.options).map_err(anyhow::Error::from)?;
        sqlx::query(
            "INSERT INTO question (quiz_id, text, position, points, options, answer) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(quiz_id)
        .bind(&q.text)
        .bind(q.position)
        .bind(q.points)
        .bind(options)
        .bind(&q.answer)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn recompute_totals(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, quiz_id: i64) -> Result<(), Error> {
    sqlx::query(
        "UPDATE quiz SET \
             total_questions = (SELECT COUNT(*) FROM question WHERE quiz_id = ?), \
             max_score = (SELECT COALESCE(SUM(points), 0) FROM question WHERE quiz_id = ?) \
         WHERE id = ?",
    )
    .bind(quiz_id)
    .bind(quiz_id)
    .bind(quiz_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Create a quiz with its questions atomically. `total_questions` and
/// `max_score` are derived, never client-supplied.
pub async fn create_quiz(
    db: &SqlitePool,
    creator_id: i64,
    role: Role,
    new: NewQuiz,
) -> Result<QuizRow, Error> {
    if !role.can(Action::ManageQuizzes) {
        return Err(Error::Forbidden("only teachers can create quizzes"));
    }
    if new.title.trim().is_empty() {
        return Err(Error::validation("quiz title is required"));
    }
    for q in &new.questions {
        q.validate()?;
    }
    let now = OffsetDateTime::now_utc();
    let mut tx = db.begin().await.map_err(anyhow::Error::from)?;
    let quiz_id = sqlx::query(
        "INSERT INTO quiz (class_id, created_by, title, description, max_attempts, \
             duration_minutes, deadline, is_active, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.class_id)
    .bind(creator_id)
    .bind(new.title.trim())
    .bind(&new.description)
    .bind(new.max_attempts)
    .bind(new.duration_minutes)
    .bind(new.deadline)
    .bind(new.is_active)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    insert_questions(&mut tx, quiz_id, &new.questions).await?;
    recompute_totals(&mut tx, quiz_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;
    get_quiz(db, quiz_id).await
}

/// Update scalar fields in place; when `questions` is supplied the question
/// set is replaced wholesale (delete-all then recreate, one transaction) and
/// the derived fields are recomputed.
pub async fn update_quiz(
    db: &SqlitePool,
    quiz_id: i64,
    requester_id: i64,
    role: Role,
    update: QuizUpdate,
) -> Result<QuizRow, Error> {
    let quiz = get_quiz(db, quiz_id).await?;
    if quiz.created_by != requester_id && role != Role::Admin {
        return Err(Error::Forbidden("only the quiz creator can edit it"));
    }
    if let Some(questions) = &update.questions {
        for q in questions {
            q.validate()?;
        }
    }
    let mut tx = db.begin().await.map_err(anyhow::Error::from)?;
    if let Some(title) = &update.title {
        if title.trim().is_empty() {
            return Err(Error::validation("quiz title must not be empty"));
        }
        sqlx::query("UPDATE quiz SET title = ? WHERE id = ?")
            .bind(title.trim())
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(description) = &update.description {
        sqlx::query("UPDATE quiz SET description = ? WHERE id = ?")
            .bind(description)
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(max_attempts) = update.max_attempts {
        sqlx::query("UPDATE quiz SET max_attempts = ? WHERE id = ?")
            .bind(max_attempts)
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(duration_minutes) = update.duration_minutes {
        sqlx::query("UPDATE quiz SET duration_minutes = ? WHERE id = ?")
            .bind(duration_minutes)
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(deadline) = update.deadline {
        sqlx::query("UPDATE quiz SET deadline = ? WHERE id = ?")
            .bind(deadline)
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(is_active) = update.is_active {
        sqlx::query("UPDATE quiz SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(questions) = &update.questions {
        sqlx::query("DELETE FROM question WHERE quiz_id = ?")
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;
        insert_questions(&mut tx, quiz_id, questions).await?;
        recompute_totals(&mut tx, quiz_id).await?;
    }
    tx.commit().await.map_err(anyhow::Error::from)?;
    get_quiz(db, quiz_id).await
}

pub async fn get_quiz(db: &SqlitePool, id: i64) -> Result<QuizRow, Error> {
    sqlx::query_as::<_, QuizRow>("SELECT * FROM quiz WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("quiz"))
}

pub async fn delete_quiz(
    db: &SqlitePool,
    id: i64,
    requester_id: i64,
    role: Role,
) -> Result<(), Error> {
    let quiz = get_quiz(db, id).await?;
    if quiz.created_by != requester_id && role != Role::Admin {
        return Err(Error::Forbidden("only the quiz creator can delete it"));
    }
    sqlx::query("DELETE FROM quiz WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn questions(db: &SqlitePool, quiz_id: i64) -> Result<Vec<QuestionRow>, Error> {
    let rows = sqlx::query_as::<_, QuestionRow>(
        "SELECT * FROM question WHERE quiz_id = ? ORDER BY position ASC, id ASC",
    )
    .bind(quiz_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Quizzes visible in the management view: admins see everything, teachers
/// see their own.
pub async fn list_managed(db: &SqlitePool, requester_id: i64, role: Role) -> Result<Vec<QuizRow>, Error> {
    let rows = match role {
        Role::Admin => {
            sqlx::query_as::<_, QuizRow>("SELECT * FROM quiz ORDER BY created_at DESC, id DESC")
                .fetch_all(db)
                .await?
        }
        Role::Teacher => {
            sqlx::query_as::<_, QuizRow>(
                "SELECT * FROM quiz WHERE created_by = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(requester_id)
            .fetch_all(db)
            .await?
        }
        Role::Student => Vec::new(),
    };
    Ok(rows)
}

/// Active quizzes in the classes the student has joined.
pub async fn list_for_student(db: &SqlitePool, student_id: i64) -> Result<Vec<QuizRow>, Error> {
    let rows = sqlx::query_as::<_, QuizRow>(
        "SELECT q.* FROM quiz q JOIN class_student cs ON cs.class_id = q.class_id \
         WHERE cs.student_id = ? AND q.is_active = 1 \
         ORDER BY q.created_at DESC, q.id DESC",
    )
    .bind(student_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Detail view for a student taking the quiz: questions without answer keys
/// plus that student's attempt usage.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuizStudentView {
    pub id: i64,
    pub class_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub max_attempts: i64,
    pub max_score: f64,
    pub duration_minutes: i64,
    pub deadline: Option<OffsetDateTime>,
    pub is_active: bool,
    pub questions: Vec<QuestionPublic>,
    pub user_attempts_count: i64,
    pub latest_score: Option<f64>,
}

pub async fn student_view(db: &SqlitePool, quiz_id: i64, user_id: i64) -> Result<QuizStudentView, Error> {
    let quiz = get_quiz(db, quiz_id).await?;
    let questions = questions(db, quiz_id)
        .await?
        .into_iter()
        .map(QuestionRow::into_public)
        .collect::<Result<Vec<_>, _>>()?;
    let user_attempts_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quiz_attempt WHERE quiz_id = ? AND user_id = ?",
    )
    .bind(quiz_id)
    .bind(user_id)
    .fetch_one(db)
    .await?;
    let latest_score: Option<f64> = sqlx::query_scalar(
        "SELECT score FROM quiz_attempt WHERE quiz_id = ? AND user_id = ? \
         ORDER BY submitted_at DESC, id DESC LIMIT 1",
    )
    .bind(quiz_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(QuizStudentView {
        id: quiz.id,
        class_id: quiz.class_id,
        title: quiz.title,
        description: quiz.description,
        max_attempts: quiz.max_attempts,
        max_score: quiz.max_score,
        duration_minutes: quiz.duration_minutes,
        deadline: quiz.deadline,
        is_active: quiz.is_active,
        questions,
        user_attempts_count,
        latest_score,
    })
}
