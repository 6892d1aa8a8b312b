use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager, types::document::Document},
    utils::{config::AppConfig, embedding::EmbeddingClient},
};

use crate::{
    extraction::{extract_content, ExtractedContent},
    utils::image_captioning::ImageCaptioner,
};

/// Side-effecting collaborators of the pipeline. Stages only talk to the outside world
/// through this trait so tests can swap in fakes.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn download(&self, document: &Document) -> Result<Bytes, AppError>;

    async fn extract(
        &self,
        document: &Document,
        bytes: Bytes,
    ) -> Result<ExtractedContent, AppError>;

    async fn store_image(&self, path: &str, data: Bytes) -> Result<(), AppError>;

    async fn caption_image(&self, data: &Bytes) -> Result<String, AppError>;

    /// One batched call; the result must have exactly one vector per text.
    async fn embed_chunks(
        &self,
        document: &Document,
        texts: Vec<String>,
        model: &str,
    ) -> Result<Vec<Vec<f32>>, AppError>;
}

pub struct DefaultPipelineServices {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    config: AppConfig,
    captioner: ImageCaptioner,
}

impl DefaultPipelineServices {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        config: AppConfig,
        captioner: ImageCaptioner,
    ) -> Self {
        Self {
            db,
            storage,
            config,
            captioner,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn download(&self, document: &Document) -> Result<Bytes, AppError> {
        self.storage
            .get(&document.file_path)
            .await
            .map_err(|err| AppError::Download(format!("Failed to download file: {err}")))
    }

    async fn extract(
        &self,
        document: &Document,
        bytes: Bytes,
    ) -> Result<ExtractedContent, AppError> {
        let mime_type = document.mime_type.clone();
        let file_name = document.file_name.clone();
        tokio::task::spawn_blocking(move || extract_content(&mime_type, &file_name, &bytes))
            .await?
    }

    async fn store_image(&self, path: &str, data: Bytes) -> Result<(), AppError> {
        self.storage.put(path, data).await?;
        Ok(())
    }

    async fn caption_image(&self, data: &Bytes) -> Result<String, AppError> {
        self.captioner.caption(data).await
    }

    async fn embed_chunks(
        &self,
        document: &Document,
        texts: Vec<String>,
        model: &str,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let client =
            EmbeddingClient::for_user(&document.user_id, model, &self.config, &self.db).await?;
        client.embed_batch(texts).await
    }
}
