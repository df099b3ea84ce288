use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::chat::{self, ChatMessage, Conversation, NewConversation};
use crate::error::Error;

use super::{AppState, AuthUser};

#[utoipa::path(
    context_path = "/api/chat",
    path = "/conversations",
    method(post),
    request_body = NewConversation,
    responses((status = 200, description = "Conversation opened with a welcome message", body = Conversation))
)]
pub async fn start(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(new): Json<NewConversation>,
) -> Result<Json<Conversation>, Error> {
    Ok(Json(chat::start(&state.db, user.id, new).await?))
}

#[utoipa::path(
    context_path = "/api/chat",
    path = "/conversations",
    method(get),
    responses((status = 200, body = Vec<Conversation>))
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Conversation>>, Error> {
    Ok(Json(chat::list_conversations(&state.db, user.id).await?))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

#[utoipa::path(
    context_path = "/api/chat",
    path = "/conversations/{id}",
    method(get),
    responses((status = 200, body = ConversationDetail), (status = 404, description = "Not found"))
)]
pub async fn detail(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ConversationDetail>, Error> {
    let conversation = chat::get_conversation(&state.db, id, user.id).await?;
    let messages = chat::messages(&state.db, conversation.id).await?;
    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

#[utoipa::path(
    context_path = "/api/chat",
    path = "/conversations/{id}",
    method(delete),
    responses((status = 200, description = "OK"), (status = 404, description = "Not found"))
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<(), Error> {
    chat::delete_conversation(&state.db, id, user.id).await
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub user_message: ChatMessage,
    pub bot_message: ChatMessage,
}

#[utoipa::path(
    context_path = "/api/chat",
    path = "/conversations/{id}/messages",
    method(post),
    request_body = MessageRequest,
    responses(
        (status = 200, description = "Both persisted turns", body = MessageResponse),
        (status = 400, description = "Empty message"),
        (status = 404, description = "Not found")
    )
)]
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let (user_message, bot_message) =
        chat::post_message(&state.db, &state.ai, id, user.id, &req.message).await?;
    Ok(Json(MessageResponse {
        user_message,
        bot_message,
    }))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations", post(start).get(list))
        .route("/conversations/{id}", get(detail).delete(delete))
        .route("/conversations/{id}/messages", post(post_message))
}
