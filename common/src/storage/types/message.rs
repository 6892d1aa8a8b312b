#![allow(clippy::module_name_repetitions)]
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{stored_object, StoredObject};

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

stored_object!(Message, "message", {
    chat_id: String,
    role: MessageRole,
    content: String,
});

impl Message {
    pub fn new(chat_id: String, role: MessageRole, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chat_id,
            role,
            content,
        }
    }

    pub async fn count_for_chat(chat_id: &str, db: &SurrealDbClient) -> Result<usize, AppError> {
        Ok(Self::history_for_chat(chat_id, db).await?.len())
    }

    /// Every message of a chat, oldest first.
    pub async fn history_for_chat(
        chat_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let messages: Vec<Message> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE chat_id = $chat_id ORDER BY created_at")
            .bind(("table", Self::table_name()))
            .bind(("chat_id", chat_id.to_owned()))
            .await?
            .take(0)?;
        Ok(messages)
    }
}
