use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::ai::{AiError, ChatTurn, GeminiClient};
use crate::error::Error;

pub const DEFAULT_TITLE: &str = "New conversation";

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct NewConversation {
    pub title: Option<String>,
}

async fn insert_message(
    db: &SqlitePool,
    conversation_id: i64,
    role: &str,
    content: &str,
) -> Result<ChatMessage, Error> {
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO chat_message (conversation_id, role, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(conversation_id)
    .bind(role)
    .bind(content)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    let row = sqlx::query_as::<_, ChatMessage>("SELECT * FROM chat_message WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await?;
    Ok(row)
}

/// Open a conversation, seeded with a bot welcome that greets the user by
/// display name.
pub async fn start(
    db: &SqlitePool,
    user_id: i64,
    new: NewConversation,
) -> Result<Conversation, Error> {
    let full_name: String = sqlx::query_scalar("SELECT full_name FROM user WHERE id = ?")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("user"))?;
    let title = new
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query("INSERT INTO conversation (user_id, title, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(&title)
        .bind(now)
        .execute(db)
        .await?
        .last_insert_rowid();
    let welcome = format!(
        "Hello, {full_name}! I am Guruku AI, ready to help you study. Ask me anything!"
    );
    insert_message(db, id, "bot", &welcome).await?;
    get_conversation(db, id, user_id).await
}

/// Fetch a conversation scoped to its owner: someone else's conversation is
/// indistinguishable from a missing one.
pub async fn get_conversation(
    db: &SqlitePool,
    conversation_id: i64,
    user_id: i64,
) -> Result<Conversation, Error> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversation WHERE id = ? AND user_id = ?")
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NotFound("conversation"))
}

pub async fn list_conversations(db: &SqlitePool, user_id: i64) -> Result<Vec<Conversation>, Error> {
    let rows = sqlx::query_as::<_, Conversation>(
        "SELECT * FROM conversation WHERE user_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn delete_conversation(
    db: &SqlitePool,
    conversation_id: i64,
    user_id: i64,
) -> Result<(), Error> {
    get_conversation(db, conversation_id, user_id).await?;
    sqlx::query("DELETE FROM conversation WHERE id = ?")
        .bind(conversation_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Messages in creation order (id as tiebreak).
pub async fn messages(db: &SqlitePool, conversation_id: i64) -> Result<Vec<ChatMessage>, Error> {
    let rows = sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM chat_message WHERE conversation_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(conversation_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Map stored messages to the AI client's role vocabulary: our "bot" is the
/// service's "model".
pub fn to_history(messages: &[ChatMessage]) -> Vec<ChatTurn> {
    messages
        .iter()
        .map(|m| ChatTurn {
            role: if m.role == "user" { "user" } else { "model" },
            content: m.content.clone(),
        })
        .collect()
}

/// The reply persisted when the AI service fails: an in-band error string,
/// so the turn still completes and the user sees what happened.
pub fn error_reply(e: &AiError) -> String {
    format!("Error: {e}")
}

/// Post one tutoring turn: persist the user's message, replay the prior
/// transcript to the AI client and persist its reply.
pub async fn post_message(
    db: &SqlitePool,
    ai: &GeminiClient,
    conversation_id: i64,
    user_id: i64,
    text: &str,
) -> Result<(ChatMessage, ChatMessage), Error> {
    if text.trim().is_empty() {
        return Err(Error::InvalidInput("message is required"));
    }
    let conversation = get_conversation(db, conversation_id, user_id).await?;

    let user_message = insert_message(db, conversation.id, "user", text).await?;
    // history excludes the message just written
    let prior: Vec<ChatMessage> = messages(db, conversation.id)
        .await?
        .into_iter()
        .filter(|m| m.id != user_message.id)
        .collect();
    let history = to_history(&prior);

    let reply = match ai.chat(text, &history).await {
        Ok(reply) => reply,
        Err(e) => error_reply(&e),
    };
    let bot_message = insert_message(db, conversation.id, "bot", &reply).await?;
    Ok((user_message, bot_message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewUser, Role, create_user};
    use crate::db::test_pool;

    async fn seed_user(db: &SqlitePool, email: &str) -> i64 {
        create_user(
            db,
            NewUser {
                email: email.into(),
                password: "pw123456".into(),
                full_name: "Ana".into(),
                role: Role::Student,
                birth_date: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn start_seeds_welcome_message() {
        let db = test_pool().await;
        let user = seed_user(&db, "ana@example.com").await;
        let conversation = start(&db, user, NewConversation::default()).await.unwrap();
        assert_eq!(conversation.title, DEFAULT_TITLE);
        let msgs = messages(&db, conversation.id).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "bot");
        assert!(msgs[0].content.contains("Ana"));
    }

    #[tokio::test]
    async fn conversations_are_owner_scoped() {
        let db = test_pool().await;
        let ana = seed_user(&db, "ana@example.com").await;
        let budi = seed_user(&db, "budi@example.com").await;
        let conversation = start(&db, ana, NewConversation { title: Some("PR Fisika".into()) })
            .await
            .unwrap();
        assert_eq!(conversation.title, "PR Fisika");
        assert!(matches!(
            get_conversation(&db, conversation.id, budi).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            delete_conversation(&db, conversation.id, budi).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(list_conversations(&db, ana).await.unwrap().len(), 1);
        assert_eq!(list_conversations(&db, budi).await.unwrap().len(), 0);

        delete_conversation(&db, conversation.id, ana).await.unwrap();
        // cascade removed the seeded welcome message
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_message")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn history_mapping_preserves_order_and_maps_roles() {
        let db = test_pool().await;
        let user = seed_user(&db, "ana@example.com").await;
        let conversation = start(&db, user, NewConversation::default()).await.unwrap();
        insert_message(&db, conversation.id, "user", "What is gravity?")
            .await
            .unwrap();
        insert_message(&db, conversation.id, "bot", "Let's reason it out together.")
            .await
            .unwrap();

        // 3 prior messages: welcome bot + user + bot
        let msgs = messages(&db, conversation.id).await.unwrap();
        assert_eq!(msgs.len(), 3);
        let history = to_history(&msgs);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, "model");
        assert_eq!(history[1].role, "user");
        assert_eq!(history[1].content, "What is gravity?");
        assert_eq!(history[2].role, "model");
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let db = test_pool().await;
        let user = seed_user(&db, "ana@example.com").await;
        let conversation = start(&db, user, NewConversation::default()).await.unwrap();
        let ai = GeminiClient::new(crate::config::GeminiConfig {
            api_key: "test".into(),
            base_url: "http://127.0.0.1:9".into(),
            model: "test".into(),
        });
        let err = post_message(&db, &ai, conversation.id, user, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        // nothing was persisted
        assert_eq!(messages(&db, conversation.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_ai_turn_persists_sentinel_reply() {
        let db = test_pool().await;
        let user = seed_user(&db, "ana@example.com").await;
        let conversation = start(&db, user, NewConversation::default()).await.unwrap();
        // port 9 (discard) refuses connections, so the AI call fails fast
        let ai = GeminiClient::new(crate::config::GeminiConfig {
            api_key: "test".into(),
            base_url: "http://127.0.0.1:9".into(),
            model: "test".into(),
        });
        let (user_msg, bot_msg) = post_message(&db, &ai, conversation.id, user, "Hi!")
            .await
            .unwrap();
        assert_eq!(user_msg.role, "user");
        assert_eq!(bot_msg.role, "bot");
        assert!(bot_msg.content.starts_with("Error"));
        // exactly two new messages after the welcome
        assert_eq!(messages(&db, conversation.id).await.unwrap().len(), 3);
    }
}
