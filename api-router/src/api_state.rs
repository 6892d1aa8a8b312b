use std::sync::Arc;

use chat_pipeline::ChatOrchestrator;
use common::{
    storage::{db::SurrealDbClient, signed_url::UrlSigner, store::StorageManager},
    utils::config::AppConfig,
};
use ingestion_pipeline::IngestionPipeline;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub signer: UrlSigner,
    pub pipeline: Arc<IngestionPipeline>,
    pub orchestrator: ChatOrchestrator,
}

impl ApiState {
    pub async fn new(
        config: &AppConfig,
        storage: StorageManager,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.ensure_initialized().await?;

        Ok(Self::from_parts(surreal_db_client, config.clone(), storage))
    }

    /// Wire the pipelines around an existing database handle.
    pub fn from_parts(db: Arc<SurrealDbClient>, config: AppConfig, storage: StorageManager) -> Self {
        let signer = UrlSigner::from_config(&config);
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&db),
            storage.clone(),
            config.clone(),
        ));
        let orchestrator =
            ChatOrchestrator::new(Arc::clone(&db), Arc::new(config.clone()), signer.clone());

        Self {
            db,
            config,
            storage,
            signer,
            pipeline,
            orchestrator,
        }
    }
}
