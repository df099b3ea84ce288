use std::sync::Arc;

use axum::extract::{Json, Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::Role;
use crate::classes::{
    self, Announcement, ClassRow, ClassStudent, ClassUpdate, NewClass,
};
use crate::error::Error;

use super::{AppState, AuthUser};

#[utoipa::path(
    context_path = "/api/classes",
    path = "/",
    method(post),
    request_body = NewClass,
    responses(
        (status = 200, description = "Class created", body = ClassRow),
        (status = 403, description = "Not a teacher")
    )
)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(new): Json<NewClass>,
) -> Result<Json<ClassRow>, Error> {
    Ok(Json(
        classes::create_class(&state.db, user.id, user.role, new).await?,
    ))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ListQuery {
    /// "all" lets a student browse beyond their joined classes, narrowed to
    /// their profile grade when one is set.
    pub mode: Option<String>,
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/",
    method(get),
    params(("mode" = Option<String>, Query, description = "\"all\" to browse every class")),
    responses((status = 200, body = Vec<ClassRow>))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ClassRow>>, Error> {
    let rows = match user.role {
        Role::Teacher => classes::list_for_teacher(&state.db, user.id).await?,
        Role::Admin => classes::list_all(&state.db, None).await?,
        Role::Student => {
            if query.mode.as_deref() == Some("all") {
                let grade = classes::student_grade(&state.db, user.id).await?;
                classes::list_all(&state.db, grade.as_deref()).await?
            } else {
                classes::list_joined(&state.db, user.id).await?
            }
        }
    };
    Ok(Json(rows))
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/{id}",
    method(get),
    responses((status = 200, body = ClassRow), (status = 404, description = "Not found"))
)]
pub async fn detail(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ClassRow>, Error> {
    Ok(Json(classes::get_class(&state.db, id).await?))
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/{id}",
    method(patch),
    request_body = ClassUpdate,
    responses((status = 200, body = ClassRow), (status = 403, description = "Forbidden"), (status = 404, description = "Not found"))
)]
pub async fn update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ClassUpdate>,
) -> Result<Json<ClassRow>, Error> {
    Ok(Json(
        classes::update_class(&state.db, id, user.id, body).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/{id}",
    method(delete),
    responses((status = 200, description = "OK"), (status = 403, description = "Forbidden"), (status = 404, description = "Not found"))
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<(), Error> {
    classes::delete_class(&state.db, id, user.id, user.role).await
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinRequest {
    pub invite_code: String,
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/join",
    method(post),
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Enrolled", body = ClassRow),
        (status = 403, description = "Not a student"),
        (status = 404, description = "Unknown invite code")
    )
)]
pub async fn join(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<JoinRequest>,
) -> Result<Json<ClassRow>, Error> {
    Ok(Json(
        classes::join_by_code(&state.db, user.id, user.role, &req.invite_code).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/{id}/leave",
    method(post),
    responses((status = 200, description = "OK"), (status = 400, description = "Not enrolled"))
)]
pub async fn leave(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<(), Error> {
    classes::leave(&state.db, id, user.id, user.role).await
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/{id}/students",
    method(get),
    responses((status = 200, body = Vec<ClassStudent>), (status = 403, description = "Forbidden"))
)]
pub async fn students(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ClassStudent>>, Error> {
    Ok(Json(classes::list_students(&state.db, id, user.id).await?))
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/{id}/announcements",
    method(get),
    responses((status = 200, body = Vec<Announcement>))
)]
pub async fn list_announcements(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Announcement>>, Error> {
    Ok(Json(classes::list_announcements(&state.db, id).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewAnnouncement {
    pub content: String,
}

#[utoipa::path(
    context_path = "/api/classes",
    path = "/{id}/announcements",
    method(post),
    request_body = NewAnnouncement,
    responses((status = 200, body = Announcement), (status = 403, description = "Forbidden"))
)]
pub async fn create_announcement(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<NewAnnouncement>,
) -> Result<Json<Announcement>, Error> {
    Ok(Json(
        classes::create_announcement(&state.db, id, user.id, req.content).await?,
    ))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create).get(list))
        .route("/join", post(join))
        .route("/{id}", get(detail).patch(update).delete(delete))
        .route("/{id}/leave", post(leave))
        .route("/{id}/students", get(students))
        .route(
            "/{id}/announcements",
            get(list_announcements).post(create_announcement),
        )
}
