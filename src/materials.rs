use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use time::OffsetDateTime;
use tracing::warn;
use utoipa::ToSchema;

use crate::ai::{AiError, GeminiClient};
use crate::error::Error;

pub const FALLBACK_MIME: &str = "application/pdf";

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct MaterialRow {
    pub id: i64,
    pub class_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub video_path: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewMaterial {
    pub title: String,
    pub content: Option<String>,
}

/// Lesson text persisted when generation fails: the material record still
/// exists and shows the error inline.
pub fn error_content(e: &AiError) -> String {
    format!("Error generating content: {e}")
}

pub async fn create_material(
    db: &SqlitePool,
    class_id: i64,
    new: NewMaterial,
    file_path: Option<String>,
    video_path: Option<String>,
) -> Result<MaterialRow, Error> {
    if new.title.trim().is_empty() {
        return Err(Error::validation("material title is required"));
    }
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO material (class_id, title, content, file_path, video_path, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(class_id)
    .bind(new.title.trim())
    .bind(&new.content)
    .bind(&file_path)
    .bind(&video_path)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    get_material(db, id).await
}

/// When a material was created with a file but no content, fill the content
/// from the AI lesson pipeline. Generation failures are persisted as an
/// in-band error string rather than failing the request.
pub async fn fill_content_from_file(
    db: &SqlitePool,
    ai: &GeminiClient,
    material: &MaterialRow,
    file: &Path,
    mime_type: &str,
) -> Result<MaterialRow, Error> {
    if material.content.as_deref().is_some_and(|c| !c.is_empty()) {
        return get_material(db, material.id).await;
    }
    let content = match ai.generate_lesson(file, mime_type).await {
        Ok(content) => content,
        Err(e) => {
            warn!("lesson generation for material {} failed: {e}", material.id);
            error_content(&e)
        }
    };
    sqlx::query("UPDATE material SET content = ? WHERE id = ?")
        .bind(&content)
        .bind(material.id)
        .execute(db)
        .await?;
    get_material(db, material.id).await
}

pub async fn get_material(db: &SqlitePool, id: i64) -> Result<MaterialRow, Error> {
    sqlx::query_as::<_, MaterialRow>("SELECT * FROM material WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("material"))
}

pub async fn list_materials(db: &SqlitePool, class_id: i64) -> Result<Vec<MaterialRow>, Error> {
    let rows = sqlx::query_as::<_, MaterialRow>(
        "SELECT * FROM material WHERE class_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(class_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MaterialUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

pub async fn update_material(
    db: &SqlitePool,
    id: i64,
    update: MaterialUpdate,
) -> Result<MaterialRow, Error> {
    get_material(db, id).await?;
    if let Some(title) = update.title {
        if title.trim().is_empty() {
            return Err(Error::validation("material title must not be empty"));
        }
        sqlx::query("UPDATE material SET title = ? WHERE id = ?")
            .bind(title.trim())
            .bind(id)
            .execute(db)
            .await?;
    }
    if let Some(content) = update.content {
        sqlx::query("UPDATE material SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(db)
            .await?;
    }
    get_material(db, id).await
}

pub async fn delete_material(db: &SqlitePool, id: i64) -> Result<(), Error> {
    let removed = sqlx::query("DELETE FROM material WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(Error::NotFound("material"));
    }
    Ok(())
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct MaterialProgress {
    pub id: i64,
    pub student_id: i64,
    pub material_id: i64,
    pub is_completed: bool,
    pub last_accessed: OffsetDateTime,
}

/// Upsert the single (student, material) progress row and mark it complete.
pub async fn mark_complete(
    db: &SqlitePool,
    material_id: i64,
    student_id: i64,
) -> Result<MaterialProgress, Error> {
    get_material(db, material_id).await?;
    let now = OffsetDateTime::now_utc();
    sqlx::query(
        "INSERT INTO material_progress (student_id, material_id, is_completed, last_accessed) \
         VALUES (?, ?, 1, ?) \
         ON CONFLICT (student_id, material_id) \
         DO UPDATE SET is_completed = 1, last_accessed = excluded.last_accessed",
    )
    .bind(student_id)
    .bind(material_id)
    .bind(now)
    .execute(db)
    .await?;
    let row = sqlx::query_as::<_, MaterialProgress>(
        "SELECT * FROM material_progress WHERE student_id = ? AND material_id = ?",
    )
    .bind(student_id)
    .bind(material_id)
    .fetch_one(db)
    .await?;
    Ok(row)
}

pub async fn progress_for_student(
    db: &SqlitePool,
    student_id: i64,
) -> Result<Vec<MaterialProgress>, Error> {
    let rows = sqlx::query_as::<_, MaterialProgress>(
        "SELECT * FROM material_progress WHERE student_id = ? ORDER BY last_accessed DESC, id DESC",
    )
    .bind(student_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}
