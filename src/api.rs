pub mod admin;
pub mod chat;
pub mod classes;
pub mod materials;
pub mod quizzes;
pub mod users;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::{FromRequestParts, Multipart};
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::ai::GeminiClient;
use crate::auth::{Role, TokenKind, verify_token};
use crate::config::Config;
use crate::error::Error;
use crate::storage::MediaStore;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub ai: GeminiClient,
    pub media: MediaStore,
    pub config: Config,
}

impl AppState {
    pub fn new(db: sqlx::SqlitePool, config: Config) -> Arc<Self> {
        Arc::new(Self {
            db,
            ai: GeminiClient::new(config.gemini.clone()),
            media: MediaStore::new(&config.media_root),
            config,
        })
    }
}

/// The authenticated caller, extracted from the bearer access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
    pub role: Role,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::Unauthorized)?;
        let claims = verify_token(
            &state.config.jwt_secret,
            bearer.token(),
            TokenKind::Access,
        )?;
        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
        })
    }
}

/// One uploaded multipart part, buffered in memory.
pub struct UploadedPart {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Collect text fields and file parts from a multipart body.
pub async fn read_multipart(
    multipart: &mut Multipart,
) -> Result<(Vec<(String, String)>, Vec<(String, UploadedPart)>), Error> {
    let mut fields = Vec::new();
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("unreadable multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::validation(format!("unreadable upload: {e}")))?
                    .to_vec();
                files.push((
                    name,
                    UploadedPart {
                        file_name,
                        content_type,
                        bytes,
                    },
                ));
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("unreadable field: {e}")))?;
                fields.push((name, value));
            }
        }
    }
    Ok((fields, files))
}

/// Stage an upload in a temp directory so the AI client can read it from
/// disk. The directory (and the copy) is removed when the guard drops.
pub async fn stage_upload(part: &UploadedPart) -> Result<(tempfile::TempDir, std::path::PathBuf), Error> {
    let dir = tempfile::tempdir().map_err(anyhow::Error::from)?;
    let file_name = Path::new(&part.file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let path = dir.path().join(file_name);
    let mut file = File::create(&path).await.map_err(anyhow::Error::from)?;
    file.write_all(&part.bytes)
        .await
        .map_err(anyhow::Error::from)?;
    Ok((dir, path))
}

pub fn upload_mime(part: &UploadedPart) -> String {
    part.content_type
        .clone()
        .unwrap_or_else(|| mime::APPLICATION_PDF.to_string())
}

#[derive(OpenApi)]
#[openapi(paths(
    users::register,
    users::login,
    users::refresh,
    users::me,
    users::update_me,
    users::upload_avatar,
    users::dashboard,
    users::announcements,
    classes::create,
    classes::list,
    classes::detail,
    classes::update,
    classes::delete,
    classes::join,
    classes::leave,
    classes::students,
    classes::list_announcements,
    classes::create_announcement,
    materials::list,
    materials::create,
    materials::detail,
    materials::update,
    materials::delete,
    materials::complete,
    materials::progress,
    materials::generate_content,
    quizzes::create,
    quizzes::list,
    quizzes::detail,
    quizzes::update,
    quizzes::delete,
    quizzes::submit,
    quizzes::history,
    quizzes::attempts,
    quizzes::generate,
    chat::start,
    chat::list,
    chat::detail,
    chat::delete,
    chat::post_message,
    admin::stats,
    admin::unverified,
    admin::verify,
    admin::create_announcement,
))]
struct ApiDoc;

async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .nest("/users", users::routes())
        // `nest` only matches the prefix without a trailing slash, so the
        // collection roots declared as `/api/classes/` and `/api/quizzes/`
        // need their slash forms registered explicitly.
        .route(
            "/classes/",
            axum::routing::post(classes::create).get(classes::list),
        )
        .nest("/classes", classes::routes())
        .nest("/materials", materials::routes())
        .route(
            "/quizzes/",
            axum::routing::post(quizzes::create).get(quizzes::list),
        )
        .nest("/quizzes", quizzes::routes())
        .nest("/chat", chat::routes())
        .nest("/admin", admin::routes())
        .route("/openapi.json", axum::routing::get(openapi_json));
    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let db = crate::db::test_pool().await;
        let config = Config {
            database: std::path::PathBuf::new(),
            media_root: std::env::temp_dir().join("elearn-api-tests"),
            jwt_secret: "test-secret".to_string(),
            gemini: crate::config::GeminiConfig {
                api_key: "test".to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
                model: "test".to_string(),
            },
        };
        router(AppState::new(db, config))
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn register_and_login(router: &Router, email: &str, role: &str) -> String {
        let (status, _) = send(
            router,
            post_json(
                "/api/users/register",
                None,
                json!({
                    "email": email,
                    "password": "pw123456",
                    "full_name": "Test User",
                    "role": role,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(
            router,
            post_json(
                "/api/users/login",
                None,
                json!({"email": email, "password": "pw123456"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["tokens"]["access"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn profile_requires_bearer_token() {
        let router = test_router().await;
        let (status, _) = send(
            &router,
            Request::get("/api/users/me").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = register_and_login(&router, "ana@example.com", "student").await;
        let (status, body) = send(&router, get_with("/api/users/me", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "ana@example.com");
        // no credential material in the response
        assert!(body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn class_lifecycle_over_http() {
        let router = test_router().await;
        let teacher = register_and_login(&router, "guru@example.com", "teacher").await;
        let student = register_and_login(&router, "siswa@example.com", "student").await;

        let (status, class) = send(
            &router,
            post_json("/api/classes/", Some(&teacher), json!({"name": "Fisika X"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let code = class["invite_code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 8);

        // students cannot create classes
        let (status, _) = send(
            &router,
            post_json("/api/classes/", Some(&student), json!({"name": "Nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, joined) = send(
            &router,
            post_json("/api/classes/join", Some(&student), json!({"invite_code": code})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["id"], class["id"]);

        let (status, listed) = send(&router, get_with("/api/classes/", &student)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn quiz_submission_over_http() {
        let router = test_router().await;
        let teacher = register_and_login(&router, "guru@example.com", "teacher").await;
        let student = register_and_login(&router, "siswa@example.com", "student").await;

        let (_, class) = send(
            &router,
            post_json("/api/classes/", Some(&teacher), json!({"name": "Fisika X"})),
        )
        .await;
        let code = class["invite_code"].as_str().unwrap();
        send(
            &router,
            post_json("/api/classes/join", Some(&student), json!({"invite_code": code})),
        )
        .await;

        let (status, quiz) = send(
            &router,
            post_json(
                "/api/quizzes/",
                Some(&teacher),
                json!({
                    "class_id": class["id"],
                    "title": "Gaya dan Gerak",
                    "duration_minutes": 30,
                    "max_attempts": 1,
                    "questions": [
                        {"text": "2 + 2 = ?", "options": ["3", "4"], "answer": "4", "points": 5.0},
                        {"text": "Ibu kota?", "options": ["Jakarta", "Bandung"], "answer": "Jakarta", "points": 5.0}
                    ]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quiz["max_score"], 10.0);
        let quiz_id = quiz["id"].as_i64().unwrap();

        // the student view hides answer keys
        let (status, view) = send(
            &router,
            get_with(&format!("/api/quizzes/{quiz_id}"), &student),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let questions = view["questions"].as_array().unwrap();
        assert_eq!(questions.len(), 2);
        assert!(questions[0].get("answer").is_none());
        let q1 = questions[0]["id"].clone();
        let q2 = questions[1]["id"].clone();

        let submit_uri = format!("/api/quizzes/{quiz_id}/submit");
        let answers = json!({"answers": [
            {"question_id": q1, "answer_text": " 4 "},
            {"question_id": q2, "answer_text": "Bandung"}
        ]});
        let (status, result) = send(
            &router,
            post_json(&submit_uri, Some(&student), answers.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["score"], 5.0);
        assert_eq!(result["attempt_number"], 1);

        // second submission exceeds max_attempts = 1
        let (status, _) = send(&router, post_json(&submit_uri, Some(&student), answers)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
