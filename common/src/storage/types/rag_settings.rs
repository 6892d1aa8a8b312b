use chrono::Utc;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{stored_object, StoredObject};

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_TOP_K_RESULTS: usize = 10;
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.2;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

stored_object!(RagSettings, "rag_settings", {
    user_id: String,
    chunk_size: usize,
    chunk_overlap: usize,
    top_k_results: usize,
    match_threshold: f32,
    embedding_model: String,
});

impl RagSettings {
    pub fn defaults_for(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k_results: DEFAULT_TOP_K_RESULTS,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_owned(),
        }
    }

    /// Saved settings for the user, or the defaults when none were saved.
    pub async fn for_user(user_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let saved: Option<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE user_id = $user_id LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .await?
            .take(0)?;
        Ok(saved.unwrap_or_else(|| Self::defaults_for(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_row_yields_defaults() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let settings = RagSettings::for_user("user-1", &db).await.expect("settings");
        assert_eq!(settings.chunk_size, 800);
        assert_eq!(settings.chunk_overlap, 100);
        assert_eq!(settings.top_k_results, 10);
        assert!((settings.match_threshold - 0.2).abs() < f32::EPSILON);
        assert_eq!(settings.embedding_model, "text-embedding-3-small");
    }

    #[tokio::test]
    async fn saved_row_wins() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.build_indexes().await.expect("indexes");

        let saved = RagSettings {
            chunk_size: 400,
            top_k_results: 3,
            ..RagSettings::defaults_for("user-1")
        };
        db.store_item(saved).await.expect("store");

        let settings = RagSettings::for_user("user-1", &db).await.expect("settings");
        assert_eq!(settings.chunk_size, 400);
        assert_eq!(settings.top_k_results, 3);

        let other = RagSettings::for_user("user-2", &db).await.expect("settings");
        assert_eq!(other.chunk_size, 800);
    }
}
