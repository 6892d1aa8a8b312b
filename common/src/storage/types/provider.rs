use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{stored_object, StoredObject};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Embedding,
    Chat,
    WebSearch,
}

const DEFAULT_CLAIMS_TABLE: &str = "provider_default";

stored_object!(ProviderConfig, "provider", {
    user_id: String,
    kind: ProviderKind,
    provider_name: String,
    display_name: String,
    base_url: String,
    api_key: String,
    #[serde(default)]
    model_id: Option<String>,
    is_default: bool,
    is_enabled: bool,
});

impl ProviderConfig {
    pub fn new(
        user_id: String,
        kind: ProviderKind,
        provider_name: String,
        display_name: String,
        base_url: String,
        api_key: String,
        model_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            kind,
            provider_name,
            display_name,
            base_url,
            api_key,
            model_id,
            is_default: false,
            is_enabled: true,
        }
    }

    /// Store a provider; the first of its kind for a user becomes the default.
    ///
    /// The default is claimed by creating a `provider_default` record keyed by (user, kind).
    /// Record ids are unique, so of two concurrent first creates only one claim commits.
    pub async fn create(mut provider: Self, db: &SurrealDbClient) -> Result<Self, AppError> {
        provider.is_default = false;
        let stored = db
            .store_item(provider)
            .await?
            .ok_or_else(|| AppError::InternalError("Provider was not stored".to_string()))?;

        let claim = db
            .client
            .query(
                "BEGIN TRANSACTION;
                 CREATE type::thing($claims, [$user_id, $kind]) SET provider_id = $id;
                 UPDATE type::thing($table, $id) SET is_default = true;
                 COMMIT TRANSACTION;",
            )
            .bind(("claims", DEFAULT_CLAIMS_TABLE))
            .bind(("table", Self::table_name()))
            .bind(("user_id", stored.user_id.clone()))
            .bind(("kind", stored.kind))
            .bind(("id", stored.id.clone()))
            .await
            .and_then(surrealdb::Response::check);

        match claim {
            Ok(_) => Ok(Self {
                is_default: true,
                ..stored
            }),
            Err(err) => {
                if Self::default_claimed(&stored.user_id, stored.kind, db).await? {
                    Ok(stored)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn default_claimed(
        user_id: &str,
        kind: ProviderKind,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let claims: Vec<String> = db
            .client
            .query("SELECT VALUE provider_id FROM type::thing($claims, [$user_id, $kind])")
            .bind(("claims", DEFAULT_CLAIMS_TABLE))
            .bind(("user_id", user_id.to_owned()))
            .bind(("kind", kind))
            .await?
            .take(0)?;
        Ok(!claims.is_empty())
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Provider {id} not found")))
    }

    pub async fn list_for_user(
        user_id: &str,
        kind: ProviderKind,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let providers: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE user_id = $user_id AND kind = $kind ORDER BY created_at",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("kind", kind))
            .await?
            .take(0)?;
        Ok(providers)
    }

    /// The user's default provider of `kind`, if it is also enabled.
    pub async fn find_default(
        user_id: &str,
        kind: ProviderKind,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let provider: Option<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE user_id = $user_id AND kind = $kind AND is_default = true AND is_enabled = true LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("kind", kind))
            .await?
            .take(0)?;
        Ok(provider)
    }

    /// Make `id` the only default of its (user, kind) pair in one transaction.
    pub async fn set_default(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let provider = Self::get(id, db).await?;

        db.client
            .query(
                "BEGIN TRANSACTION;
                 UPDATE type::table($table) SET is_default = false, updated_at = time::now()
                    WHERE user_id = $user_id AND kind = $kind AND is_default = true;
                 UPDATE type::thing($table, $id) SET is_default = true, updated_at = time::now();
                 COMMIT TRANSACTION;",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", provider.user_id.clone()))
            .bind(("kind", provider.kind))
            .bind(("id", id.to_owned()))
            .await?
            .check()?;

        Ok(Self {
            is_default: true,
            ..provider
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(user_id: &str, kind: ProviderKind, name: &str) -> ProviderConfig {
        ProviderConfig::new(
            user_id.into(),
            kind,
            name.into(),
            name.to_uppercase(),
            "http://localhost:1234".into(),
            "key".into(),
            Some("model".into()),
        )
    }

    async fn setup_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn first_provider_of_a_kind_becomes_default() {
        let db = setup_db().await;

        let first = ProviderConfig::create(provider("user-1", ProviderKind::WebSearch, "brave"), &db)
            .await
            .expect("create");
        let second =
            ProviderConfig::create(provider("user-1", ProviderKind::WebSearch, "tavily"), &db)
                .await
                .expect("create");
        let other_kind =
            ProviderConfig::create(provider("user-1", ProviderKind::Embedding, "openai"), &db)
                .await
                .expect("create");

        assert!(first.is_default);
        assert!(!second.is_default);
        assert!(other_kind.is_default);

        let found = ProviderConfig::find_default("user-1", ProviderKind::WebSearch, &db)
            .await
            .expect("find default");
        assert_eq!(found.map(|p| p.id), Some(first.id));
    }

    #[tokio::test]
    async fn set_default_leaves_exactly_one_default() {
        let db = setup_db().await;
        let first = ProviderConfig::create(provider("user-1", ProviderKind::Chat, "a"), &db)
            .await
            .expect("create");
        let second = ProviderConfig::create(provider("user-1", ProviderKind::Chat, "b"), &db)
            .await
            .expect("create");
        let foreign = ProviderConfig::create(provider("user-2", ProviderKind::Chat, "c"), &db)
            .await
            .expect("create");

        ProviderConfig::set_default(&second.id, &db)
            .await
            .expect("set default");

        let providers = ProviderConfig::list_for_user("user-1", ProviderKind::Chat, &db)
            .await
            .expect("list");
        let defaults: Vec<&str> = providers
            .iter()
            .filter(|p| p.is_default)
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(defaults, vec![second.id.as_str()]);
        assert_ne!(first.id, second.id);

        let untouched = ProviderConfig::get(&foreign.id, &db).await.expect("get");
        assert!(untouched.is_default);
    }

    #[tokio::test]
    async fn concurrent_first_creates_leave_exactly_one_default() {
        let db = setup_db().await;

        let (first, second) = tokio::join!(
            ProviderConfig::create(provider("user-1", ProviderKind::Chat, "a"), &db),
            ProviderConfig::create(provider("user-1", ProviderKind::Chat, "b"), &db),
        );
        let first = first.expect("create");
        let second = second.expect("create");
        assert!(first.is_default ^ second.is_default);

        let providers = ProviderConfig::list_for_user("user-1", ProviderKind::Chat, &db)
            .await
            .expect("list");
        assert_eq!(providers.len(), 2);
        assert_eq!(providers.iter().filter(|p| p.is_default).count(), 1);
    }

    #[tokio::test]
    async fn disabled_default_is_not_returned() {
        let db = setup_db().await;
        let mut disabled = provider("user-1", ProviderKind::Embedding, "openai");
        disabled.is_enabled = false;
        ProviderConfig::create(disabled, &db).await.expect("create");

        let found = ProviderConfig::find_default("user-1", ProviderKind::Embedding, &db)
            .await
            .expect("find default");
        assert!(found.is_none());
    }
}
