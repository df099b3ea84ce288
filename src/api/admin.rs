use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::routing::{get, post};
use axum::Router;

use crate::auth::Action;
use crate::error::Error;
use crate::users::{self, AdminStats, NewSystemAnnouncement, SystemAnnouncement, UserInfo};

use super::{AppState, AuthUser};

fn require_admin(user: AuthUser) -> Result<(), Error> {
    if !user.role.can(Action::Administer) {
        return Err(Error::Forbidden("administrator access required"));
    }
    Ok(())
}

#[utoipa::path(
    context_path = "/api/admin",
    path = "/stats",
    method(get),
    responses((status = 200, body = AdminStats), (status = 403, description = "Forbidden"))
)]
pub async fn stats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<AdminStats>, Error> {
    require_admin(user)?;
    Ok(Json(users::admin_stats(&state.db).await?))
}

#[utoipa::path(
    context_path = "/api/admin",
    path = "/unverified",
    method(get),
    responses((status = 200, body = Vec<UserInfo>), (status = 403, description = "Forbidden"))
)]
pub async fn unverified(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<UserInfo>>, Error> {
    require_admin(user)?;
    Ok(Json(users::list_unverified(&state.db).await?))
}

#[utoipa::path(
    context_path = "/api/admin",
    path = "/users/{id}/verify",
    method(post),
    responses((status = 200, description = "OK"), (status = 403, description = "Forbidden"), (status = 404, description = "Not found"))
)]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<(), Error> {
    require_admin(user)?;
    users::verify_user(&state.db, id).await
}

#[utoipa::path(
    context_path = "/api/admin",
    path = "/announcements",
    method(post),
    request_body = NewSystemAnnouncement,
    responses(
        (status = 200, body = SystemAnnouncement),
        (status = 400, description = "Unknown target role"),
        (status = 403, description = "Forbidden")
    )
)]
pub async fn create_announcement(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(new): Json<NewSystemAnnouncement>,
) -> Result<Json<SystemAnnouncement>, Error> {
    require_admin(user)?;
    Ok(Json(users::create_system_announcement(&state.db, new).await?))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(stats))
        .route("/unverified", get(unverified))
        .route("/users/{id}/verify", post(verify))
        .route("/announcements", post(create_announcement))
}
