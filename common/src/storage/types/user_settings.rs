use chrono::Utc;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{stored_object, StoredObject};

stored_object!(UserSettings, "user_settings", {
    user_id: String,
    #[serde(default)]
    selected_model: Option<String>,
});

impl UserSettings {
    pub fn new(user_id: String, selected_model: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            selected_model,
        }
    }

    pub async fn selected_model(user_id: &str, db: &SurrealDbClient) -> Result<Option<String>, AppError> {
        let settings: Option<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE user_id = $user_id LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .await?
            .take(0)?;
        Ok(settings.and_then(|s| s.selected_model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn selected_model_lookup() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.store_item(UserSettings::new(
            "user-1".into(),
            Some("google/gemini-2.5-pro".into()),
        ))
        .await
        .expect("store");

        assert_eq!(
            UserSettings::selected_model("user-1", &db)
                .await
                .expect("lookup")
                .as_deref(),
            Some("google/gemini-2.5-pro")
        );
        assert!(UserSettings::selected_model("user-2", &db)
            .await
            .expect("lookup")
            .is_none());
    }
}
