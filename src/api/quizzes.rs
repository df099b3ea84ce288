use std::sync::Arc;

use axum::extract::{Json, Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::attempts::{self, AttemptHistoryEntry, AttemptReport, AttemptRow, SubmittedAnswer};
use crate::auth::{Action, Role};
use crate::error::Error;
use crate::quizzes::{
    self, NewQuiz, QuestionFull, QuestionRow, QuestionSpec, QuizRow, QuizUpdate,
};

use super::{AppState, AuthUser, read_multipart, stage_upload, upload_mime};

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/",
    method(post),
    request_body = NewQuiz,
    responses(
        (status = 200, description = "Quiz created with questions", body = QuizRow),
        (status = 400, description = "Invalid question set"),
        (status = 403, description = "Not a teacher")
    )
)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(new): Json<NewQuiz>,
) -> Result<Json<QuizRow>, Error> {
    Ok(Json(
        quizzes::create_quiz(&state.db, user.id, user.role, new).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/",
    method(get),
    responses((status = 200, body = Vec<QuizRow>))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<QuizRow>>, Error> {
    let rows = match user.role {
        Role::Student => quizzes::list_for_student(&state.db, user.id).await?,
        _ => quizzes::list_managed(&state.db, user.id, user.role).await?,
    };
    Ok(Json(rows))
}

/// Teacher-facing detail: the quiz with its full question set, answer keys
/// included.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuizDetail {
    #[serde(flatten)]
    pub quiz: QuizRow,
    pub questions: Vec<QuestionFull>,
}

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/{id}",
    method(get),
    responses(
        (status = 200, description = "Student view (no answer keys) or teacher detail"),
        (status = 404, description = "Not found")
    )
)]
pub async fn detail(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, Error> {
    if user.role == Role::Student {
        let view = quizzes::student_view(&state.db, id, user.id).await?;
        return Ok(Json(view).into_response());
    }
    let quiz = quizzes::get_quiz(&state.db, id).await?;
    let questions = quizzes::questions(&state.db, id)
        .await?
        .into_iter()
        .map(QuestionRow::into_full)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(QuizDetail { quiz, questions }).into_response())
}

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/{id}",
    method(patch),
    request_body = QuizUpdate,
    responses((status = 200, body = QuizRow), (status = 403, description = "Forbidden"), (status = 404, description = "Not found"))
)]
pub async fn update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<QuizUpdate>,
) -> Result<Json<QuizRow>, Error> {
    Ok(Json(
        quizzes::update_quiz(&state.db, id, user.id, user.role, body).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/{id}",
    method(delete),
    responses((status = 200, description = "OK"), (status = 403, description = "Forbidden"), (status = 404, description = "Not found"))
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<(), Error> {
    quizzes::delete_quiz(&state.db, id, user.id, user.role).await
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitRequest {
    pub answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    #[serde(flatten)]
    pub attempt: AttemptRow,
    pub attempt_number: i64,
    pub max_score: f64,
}

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/{id}/submit",
    method(post),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Scored attempt", body = SubmitResponse),
        (status = 400, description = "Attempt limit reached"),
        (status = 404, description = "Not found")
    )
)]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, Error> {
    let quiz = quizzes::get_quiz(&state.db, id).await?;
    let attempt = attempts::submit(&state.db, id, user.id, req.answers).await?;
    let attempt_number = attempts::attempt_number(&state.db, &attempt).await?;
    Ok(Json(SubmitResponse {
        attempt,
        attempt_number,
        max_score: quiz.max_score,
    }))
}

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/history",
    method(get),
    responses((status = 200, description = "Caller's attempts, newest first", body = Vec<AttemptHistoryEntry>))
)]
pub async fn history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<AttemptHistoryEntry>>, Error> {
    Ok(Json(attempts::history(&state.db, user.id).await?))
}

#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/{id}/attempts",
    method(get),
    responses(
        (status = 200, description = "All attempts on this quiz", body = Vec<AttemptReport>),
        (status = 403, description = "Not the quiz creator")
    )
)]
pub async fn attempts(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AttemptReport>>, Error> {
    let quiz = quizzes::get_quiz(&state.db, id).await?;
    if quiz.created_by != user.id && user.role != Role::Admin {
        return Err(Error::Forbidden("only the quiz creator can view attempts"));
    }
    Ok(Json(attempts::list_for_quiz(&state.db, id).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateQuery {
    pub max_questions: Option<u32>,
}

pub const DEFAULT_GENERATED_QUESTIONS: u32 = 10;

/// Draft quiz questions from an uploaded document. Degrades to an empty list
/// when the AI service fails or returns unparseable JSON; nothing persists
/// until the teacher reviews and creates the quiz.
#[utoipa::path(
    context_path = "/api/quizzes",
    path = "/generate",
    method(post),
    params(("max_questions" = Option<u32>, Query, description = "Upper bound on generated questions")),
    responses(
        (status = 200, description = "Drafted questions, possibly empty", body = Vec<QuestionSpec>),
        (status = 400, description = "Missing file"),
        (status = 403, description = "Not a teacher")
    )
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<GenerateQuery>,
    mut multipart: Multipart,
) -> Result<Json<Vec<QuestionSpec>>, Error> {
    if !user.role.can(Action::ManageQuizzes) {
        return Err(Error::Forbidden("only teachers can generate quizzes"));
    }
    let (_, files) = read_multipart(&mut multipart).await?;
    let (_, part) = files
        .into_iter()
        .find(|(name, _)| name == "file")
        .ok_or(Error::InvalidInput("a file part is required"))?;
    let max_questions = query.max_questions.unwrap_or(DEFAULT_GENERATED_QUESTIONS);
    let (_dir, path) = stage_upload(&part).await?;
    let questions = state
        .ai
        .generate_quiz(&path, &upload_mime(&part), max_questions)
        .await;
    Ok(Json(questions))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create).get(list))
        .route("/history", get(history))
        .route("/generate", post(generate))
        .route("/{id}", get(detail).patch(update).delete(delete))
        .route("/{id}/submit", post(submit))
        .route("/{id}/attempts", get(attempts))
}
