use std::sync::Arc;

use axum::extract::{Json, Multipart, Path, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Action, Role};
use crate::classes;
use crate::error::Error;
use crate::materials::{
    self, MaterialProgress, MaterialRow, MaterialUpdate, NewMaterial,
};
use crate::storage::{MATERIAL_FILES, MATERIAL_VIDEOS};

use super::{AppState, AuthUser, read_multipart, stage_upload, upload_mime};

async fn require_class_owner(
    state: &AppState,
    class_id: i64,
    user: AuthUser,
) -> Result<(), Error> {
    let class = classes::get_class(&state.db, class_id).await?;
    if class.teacher_id != user.id && user.role != Role::Admin {
        return Err(Error::Forbidden("only the owning teacher can manage materials"));
    }
    Ok(())
}

#[utoipa::path(
    context_path = "/api/materials",
    path = "/class/{class_id}",
    method(get),
    responses((status = 200, body = Vec<MaterialRow>), (status = 404, description = "Not found"))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(class_id): Path<i64>,
) -> Result<Json<Vec<MaterialRow>>, Error> {
    classes::get_class(&state.db, class_id).await?;
    Ok(Json(materials::list_materials(&state.db, class_id).await?))
}

/// Multipart create: `title` and optional `content` as text fields, optional
/// `file` and `video` parts. A file with no content triggers lesson
/// generation.
#[utoipa::path(
    context_path = "/api/materials",
    path = "/class/{class_id}",
    method(post),
    responses(
        (status = 200, description = "Material created", body = MaterialRow),
        (status = 400, description = "Missing title"),
        (status = 403, description = "Not the owning teacher")
    )
)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(class_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<MaterialRow>, Error> {
    require_class_owner(&state, class_id, user).await?;
    let (fields, files) = read_multipart(&mut multipart).await?;
    let field = |name: &str| {
        fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    let title = field("title").ok_or(Error::InvalidInput("a title field is required"))?;
    let content = field("content").filter(|c| !c.is_empty());

    let mut file_path = None;
    let mut video_path = None;
    let mut lesson_source = None;
    for (name, part) in files {
        match name.as_str() {
            "file" => {
                let saved = state
                    .media
                    .save(MATERIAL_FILES, &part.file_name, &part.bytes)
                    .await?;
                file_path = Some(saved);
                lesson_source = Some(part);
            }
            "video" => {
                video_path = Some(
                    state
                        .media
                        .save(MATERIAL_VIDEOS, &part.file_name, &part.bytes)
                        .await?,
                );
            }
            _ => {}
        }
    }

    let row = materials::create_material(
        &state.db,
        class_id,
        NewMaterial { title, content },
        file_path.clone(),
        video_path,
    )
    .await?;
    let row = match (&lesson_source, &file_path) {
        (Some(part), Some(relative)) if row.content.as_deref().unwrap_or("").is_empty() => {
            let absolute = state.media.absolute(relative);
            materials::fill_content_from_file(&state.db, &state.ai, &row, &absolute, &upload_mime(part))
                .await?
        }
        _ => row,
    };
    Ok(Json(row))
}

#[utoipa::path(
    context_path = "/api/materials",
    path = "/{id}",
    method(get),
    responses((status = 200, body = MaterialRow), (status = 404, description = "Not found"))
)]
pub async fn detail(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MaterialRow>, Error> {
    Ok(Json(materials::get_material(&state.db, id).await?))
}

#[utoipa::path(
    context_path = "/api/materials",
    path = "/{id}",
    method(patch),
    request_body = MaterialUpdate,
    responses((status = 200, body = MaterialRow), (status = 403, description = "Forbidden"), (status = 404, description = "Not found"))
)]
pub async fn update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<MaterialUpdate>,
) -> Result<Json<MaterialRow>, Error> {
    let material = materials::get_material(&state.db, id).await?;
    require_class_owner(&state, material.class_id, user).await?;
    Ok(Json(materials::update_material(&state.db, id, body).await?))
}

#[utoipa::path(
    context_path = "/api/materials",
    path = "/{id}",
    method(delete),
    responses((status = 200, description = "OK"), (status = 403, description = "Forbidden"), (status = 404, description = "Not found"))
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<(), Error> {
    let material = materials::get_material(&state.db, id).await?;
    require_class_owner(&state, material.class_id, user).await?;
    materials::delete_material(&state.db, id).await?;
    for path in [material.file_path, material.video_path].into_iter().flatten() {
        state.media.delete(&path).await?;
    }
    Ok(())
}

#[utoipa::path(
    context_path = "/api/materials",
    path = "/{id}/complete",
    method(post),
    responses(
        (status = 200, description = "Progress recorded", body = MaterialProgress),
        (status = 403, description = "Not a student")
    )
)]
pub async fn complete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MaterialProgress>, Error> {
    if !user.role.can(Action::JoinClasses) {
        return Err(Error::Forbidden("only students track material progress"));
    }
    Ok(Json(materials::mark_complete(&state.db, id, user.id).await?))
}

#[utoipa::path(
    context_path = "/api/materials",
    path = "/progress",
    method(get),
    responses((status = 200, body = Vec<MaterialProgress>))
)]
pub async fn progress(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<MaterialProgress>>, Error> {
    Ok(Json(
        materials::progress_for_student(&state.db, user.id).await?,
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GeneratedContent {
    pub content: String,
}

/// Run the lesson pipeline over an uploaded document without creating a
/// material. The upload is staged in a temp directory and removed afterwards.
#[utoipa::path(
    context_path = "/api/materials",
    path = "/generate_content",
    method(post),
    responses(
        (status = 200, description = "Generated Markdown lesson", body = GeneratedContent),
        (status = 400, description = "Missing file"),
        (status = 502, description = "Generation failed")
    )
)]
pub async fn generate_content(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<GeneratedContent>, Error> {
    if !user.role.can(Action::ManageClasses) {
        return Err(Error::Forbidden("only teachers can generate content"));
    }
    let (_, files) = read_multipart(&mut multipart).await?;
    let (_, part) = files
        .into_iter()
        .find(|(name, _)| name == "file")
        .ok_or(Error::InvalidInput("a file part is required"))?;
    let (_dir, path) = stage_upload(&part).await?;
    let content = state.ai.generate_lesson(&path, &upload_mime(&part)).await?;
    Ok(Json(GeneratedContent { content }))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/class/{class_id}", get(list).post(create))
        .route("/progress", get(progress))
        .route("/generate_content", post(generate_content))
        .route("/{id}", get(detail).patch(update).delete(delete))
        .route("/{id}/complete", post(complete))
}
