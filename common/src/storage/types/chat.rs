use chrono::Utc;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{stored_object, StoredObject};

const TITLE_WORDS: usize = 6;
const TITLE_MAX_CHARS: usize = 100;

stored_object!(Chat, "chat", {
    user_id: String,
    title: String,
});

impl Chat {
    pub fn new(user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title,
        }
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat not found".to_string()))
    }

    pub async fn update_title(id: &str, title: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing($table, $id) SET title = $title, updated_at = time::now()")
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("title", title.to_owned()))
            .await?
            .check()?;
        Ok(())
    }
}

/// Title for a new chat: the first six words of the opening message, `...` when truncated.
pub fn derive_title(message: &str) -> String {
    let words: Vec<&str> = message.split_whitespace().collect();
    let mut title = words
        .iter()
        .take(TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > TITLE_WORDS {
        title.push_str("...");
    }
    title.chars().take(TITLE_MAX_CHARS).collect()
}
