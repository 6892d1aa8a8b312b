use chrono::Utc;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{stored_object, StoredObject};

stored_object!(Collection, "collection", {
    user_id: String,
    name: String,
});

impl Collection {
    pub fn new(user_id: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            name,
        }
    }
}

stored_object!(ChatCollection, "chat_collection", {
    chat_id: String,
    collection_id: String,
});

impl ChatCollection {
    pub fn new(chat_id: String, collection_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chat_id,
            collection_id,
        }
    }

    /// Ids of every collection linked to the chat, oldest link first.
    pub async fn collection_ids_for_chat(
        chat_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        let links: Vec<ChatCollection> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE chat_id = $chat_id ORDER BY created_at")
            .bind(("table", Self::table_name()))
            .bind(("chat_id", chat_id.to_owned()))
            .await?
            .take(0)?;

        let mut ids: Vec<String> = Vec::with_capacity(links.len());
        for link in links {
            if !ids.contains(&link.collection_id) {
                ids.push(link.collection_id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn linked_collection_ids_are_deduplicated_and_scoped_to_chat() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let first = Collection::new("user-1".into(), "Manuals".into());
        let second = Collection::new("user-1".into(), "Invoices".into());
        db.store_item(first.clone()).await.expect("store");
        db.store_item(second.clone()).await.expect("store");

        for link in [
            ChatCollection::new("chat-1".into(), first.id.clone()),
            ChatCollection::new("chat-1".into(), second.id.clone()),
            ChatCollection::new("chat-1".into(), first.id.clone()),
            ChatCollection::new("chat-2".into(), second.id.clone()),
        ] {
            db.store_item(link).await.expect("store link");
        }

        let ids = ChatCollection::collection_ids_for_chat("chat-1", &db)
            .await
            .expect("query links");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id));
        assert!(ids.contains(&second.id));

        let none = ChatCollection::collection_ids_for_chat("chat-3", &db)
            .await
            .expect("query links");
        assert!(none.is_empty());
    }
}
