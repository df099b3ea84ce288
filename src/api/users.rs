use std::sync::Arc;

use axum::extract::{Json, Multipart, State};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{self, NewUser, TokenPair};
use crate::error::Error;
use crate::storage::PROFILE_PICS;
use crate::users::{
    self, ProfileUpdate, SystemAnnouncement, TeacherDashboard, UserInfo,
};

use super::{AppState, AuthUser, read_multipart};

#[utoipa::path(
    context_path = "/api/users",
    path = "/register",
    method(post),
    request_body = NewUser,
    responses(
        (status = 200, description = "Account created", body = UserInfo),
        (status = 400, description = "Invalid or duplicate registration")
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewUser>,
) -> Result<Json<UserInfo>, Error> {
    let user = auth::create_user(&state.db, new).await?;
    Ok(Json(UserInfo::from_row(user)?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserInfo,
    pub tokens: TokenPair,
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/login",
    method(post),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, Error> {
    let (user, tokens) =
        auth::login(&state.db, &state.config.jwt_secret, &req.email, &req.password).await?;
    Ok(Json(LoginResponse {
        user: UserInfo::from_row(user)?,
        tokens,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/refresh",
    method(post),
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Fresh token pair", body = TokenPair),
        (status = 401, description = "Invalid refresh token")
    )
)]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, Error> {
    Ok(Json(auth::refresh(&state.config.jwt_secret, &req.refresh)?))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/me",
    method(get),
    responses((status = 200, body = UserInfo), (status = 401, description = "Unauthenticated"))
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UserInfo>, Error> {
    let row = users::get_user(&state.db, user.id).await?;
    Ok(Json(UserInfo::from_row(row)?))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/me",
    method(patch),
    request_body = ProfileUpdate,
    responses((status = 200, body = UserInfo), (status = 401, description = "Unauthenticated"))
)]
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserInfo>, Error> {
    let row = users::update_profile(&state.db, user.id, update).await?;
    Ok(Json(UserInfo::from_row(row)?))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/me/avatar",
    method(post),
    responses(
        (status = 200, description = "Avatar stored", body = UserInfo),
        (status = 400, description = "Missing or non-image upload")
    )
)]
pub async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UserInfo>, Error> {
    let (_, files) = read_multipart(&mut multipart).await?;
    let (_, part) = files
        .into_iter()
        .find(|(name, _)| name == "file")
        .ok_or(Error::InvalidInput("a file part is required"))?;
    let is_image = part
        .content_type
        .as_deref()
        .and_then(|c| c.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.type_() == mime::IMAGE);
    if !is_image {
        return Err(Error::InvalidInput("avatar must be an image"));
    }
    let path = state
        .media
        .save(PROFILE_PICS, &part.file_name, &part.bytes)
        .await?;
    users::set_profile_picture(&state.db, user.id, &path).await?;
    let row = users::get_user(&state.db, user.id).await?;
    Ok(Json(UserInfo::from_row(row)?))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/dashboard",
    method(get),
    responses(
        (status = 200, description = "Teaching activity summary", body = TeacherDashboard),
        (status = 403, description = "Not a teacher")
    )
)]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<TeacherDashboard>, Error> {
    if !user.role.can(crate::auth::Action::ManageClasses) {
        return Err(Error::Forbidden("only teachers have a dashboard"));
    }
    Ok(Json(users::teacher_dashboard(&state.db, user.id).await?))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/announcements",
    method(get),
    responses((status = 200, body = Vec<SystemAnnouncement>))
)]
pub async fn announcements(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<SystemAnnouncement>>, Error> {
    Ok(Json(
        users::list_system_announcements(&state.db, user.role).await?,
    ))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/me", get(me).patch(update_me))
        .route("/me/avatar", post(upload_avatar))
        .route("/dashboard", get(dashboard))
        .route("/announcements", get(announcements))
}
