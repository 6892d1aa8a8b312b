use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document::Document, rag_settings::RagSettings},
    },
};
use tracing::error;

use crate::{
    chunking::{CaptionedImage, PlannedChunk},
    extraction::ExtractedContent,
};

use super::{progress::ProgressTracker, services::PipelineServices};

pub struct PipelineContext<'a> {
    pub document: Document,
    pub db: &'a SurrealDbClient,
    pub services: &'a dyn PipelineServices,
    pub tracker: ProgressTracker<'a>,
    pub raw_bytes: Option<Bytes>,
    pub extracted: Option<ExtractedContent>,
    pub images_processed: usize,
    pub images_captioned: usize,
    pub captioned_images: Vec<CaptionedImage>,
    pub settings: Option<RagSettings>,
    pub planned_chunks: Vec<PlannedChunk>,
    pub embeddings: Vec<Vec<f32>>,
    pub stored_chunks: usize,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        document: Document,
        db: &'a SurrealDbClient,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let tracker = ProgressTracker::new(document.id.clone(), db);
        Self {
            document,
            db,
            services,
            tracker,
            raw_bytes: None,
            extracted: None,
            images_processed: 0,
            images_captioned: 0,
            captioned_images: Vec::new(),
            settings: None,
            planned_chunks: Vec::new(),
            embeddings: Vec::new(),
            stored_chunks: 0,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document.id
    }

    pub fn take_raw_bytes(&mut self) -> Result<Bytes, AppError> {
        self.raw_bytes
            .take()
            .ok_or_else(|| AppError::InternalError("downloaded bytes expected to be available".into()))
    }

    pub fn extracted(&self) -> Result<&ExtractedContent, AppError> {
        self.extracted
            .as_ref()
            .ok_or_else(|| AppError::InternalError("extracted content expected to be available".into()))
    }

    pub fn settings(&self) -> Result<&RagSettings, AppError> {
        self.settings
            .as_ref()
            .ok_or_else(|| AppError::InternalError("rag settings expected to be loaded".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            document_id = %self.document.id,
            progress = self.tracker.progress(),
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
