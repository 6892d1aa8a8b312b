mod context;
mod progress;
mod services;
mod stages;
mod state;

pub use progress::ProgressTracker;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{sync::Arc, time::Instant};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            document::Document,
            processing_progress::{ProcessingProgress, VerificationStatus},
        },
    },
    utils::config::AppConfig,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::utils::image_captioning::ImageCaptioner;

use self::{
    context::PipelineContext,
    stages::{caption, chunk, download, embed, extract, save, verify},
    state::ready,
};

/// Outcome of a successful ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub chunks: usize,
    pub images: usize,
    /// Whole seconds.
    pub processing_time: u64,
    pub verified: bool,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager, config: AppConfig) -> Self {
        let captioner = ImageCaptioner::from_config(&config);
        let services = DefaultPipelineServices::new(Arc::clone(&db), storage, config, captioner);
        Self::with_services(db, Arc::new(services))
    }

    pub fn with_services(db: Arc<SurrealDbClient>, services: Arc<dyn PipelineServices>) -> Self {
        Self { db, services }
    }

    /// Run every stage for the document. On failure the document is marked failed with the
    /// error message before the error is returned.
    #[tracing::instrument(skip_all, fields(document_id = %document_id))]
    pub async fn process_document(&self, document_id: &str) -> Result<IngestionReport, AppError> {
        let document = Document::get(document_id, &self.db).await?;

        match self.drive_pipeline(document).await {
            Ok(report) => Ok(report),
            Err(err) => {
                if let Err(mark_err) =
                    Document::mark_failed(document_id, &err.to_string(), &self.db).await
                {
                    warn!(
                        document_id = %document_id,
                        error = %mark_err,
                        "Failed to record ingestion failure on document"
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive_pipeline(&self, document: Document) -> Result<IngestionReport, AppError> {
        let started = Instant::now();
        let mut ctx = PipelineContext::new(document, self.db.as_ref(), self.services.as_ref());

        let machine = ready();
        let machine = download(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = extract(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = caption(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = chunk(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = save(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let (_machine, verification) = verify(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let processing_time = started.elapsed().as_secs_f64().round() as u64;
        let completed = ProcessingProgress::completed(
            processing_time,
            verification,
            ctx.images_processed,
            ctx.images_captioned,
        );
        Document::mark_indexed(ctx.document_id(), &completed, ctx.db)
            .await
            .map_err(|err| ctx.abort(err))?;

        info!(
            document_id = %ctx.document.id,
            chunk_count = ctx.stored_chunks,
            images = ctx.images_captioned,
            processing_time,
            "ingestion pipeline finished"
        );

        Ok(IngestionReport {
            chunks: ctx.stored_chunks,
            images: ctx.images_captioned,
            processing_time,
            verified: verification == VerificationStatus::Passed,
        })
    }
}
