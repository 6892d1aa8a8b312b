use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// Connects to `address`, signs in as root and selects the namespace/database pair.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.build_indexes().await
    }

    /// Secondary indexes backing the lookups the pipelines run on every request.
    pub async fn build_indexes(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_chunk_document ON chunk FIELDS document_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_collection ON chunk FIELDS collection_id;
                 DEFINE INDEX IF NOT EXISTS idx_document_collection ON document FIELDS collection_id;
                 DEFINE INDEX IF NOT EXISTS idx_message_chat ON message FIELDS chat_id;
                 DEFINE INDEX IF NOT EXISTS idx_chat_collection_chat ON chat_collection FIELDS chat_id;
                 DEFINE INDEX IF NOT EXISTS idx_provider_owner_kind ON provider FIELDS user_id, kind;
                 DEFINE INDEX IF NOT EXISTS idx_rag_settings_user ON rag_settings FIELDS user_id UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_user_settings_user ON user_settings FIELDS user_id UNIQUE;",
            )
            .await?
            .check()?;

        Ok(())
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
