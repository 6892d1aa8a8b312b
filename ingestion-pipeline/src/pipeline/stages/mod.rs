use common::{
    error::AppError,
    storage::types::{
        chunk::Chunk,
        processing_progress::{PipelineStep, VerificationStatus},
        rag_settings::RagSettings,
    },
};
use serde_json::json;
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use crate::{
    chunking::{plan_chunks, CaptionedImage, WordBudget},
    extraction::EmbeddedImages,
};

use super::{
    context::PipelineContext,
    progress::{caption_eta, caption_progress},
    state::{
        Captioned, Chunked, Downloaded, Embedded, Extracted, IngestionMachine, Ready, Saved,
        Verified,
    },
};

#[instrument(skip_all, fields(document_id = %ctx.document.id))]
pub async fn download(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Downloaded>, AppError> {
    ctx.tracker
        .advance(PipelineStep::Download, 5, Some(90))
        .await?;

    let bytes = ctx.services.download(&ctx.document).await?;
    let received = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if received != ctx.document.file_size {
        warn!(
            document_id = %ctx.document.id,
            expected = ctx.document.file_size,
            received,
            "Downloaded size differs from recorded file size"
        );
    }
    debug!(document_id = %ctx.document.id, bytes = received, "file downloaded");
    ctx.raw_bytes = Some(bytes);

    machine
        .download()
        .map_err(|(_, guard)| map_guard_error("download", &guard))
}

#[instrument(skip_all, fields(document_id = %ctx.document.id))]
pub async fn extract(
    machine: IngestionMachine<(), Downloaded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    ctx.tracker
        .advance(PipelineStep::Extract, 15, Some(75))
        .await?;

    let bytes = ctx.take_raw_bytes()?;
    let content = ctx.services.extract(&ctx.document, bytes).await?;

    if content.images == EmbeddedImages::Unsupported {
        info!(
            document_id = %ctx.document.id,
            mime_type = %ctx.document.mime_type,
            "Image extraction is not supported for this format; indexing text only"
        );
    }
    info!(
        document_id = %ctx.document.id,
        text_chars = content.text.chars().count(),
        images = content.images.as_slice().len(),
        "document content extracted"
    );
    ctx.extracted = Some(content);

    ctx.tracker
        .advance(PipelineStep::Extract, 30, Some(60))
        .await?;

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

/// Upload and caption images one at a time. A failed upload or caption drops that image only.
#[instrument(skip_all, fields(document_id = %ctx.document.id))]
pub async fn caption(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Captioned>, AppError> {
    ctx.tracker
        .advance(PipelineStep::Caption, 35, Some(55))
        .await?;

    let images = ctx.extracted()?.images.as_slice().to_vec();
    let total = images.len();
    let prefix = ctx.document.image_prefix();
    let mut captioned = Vec::new();

    for (position, image) in images.into_iter().enumerate() {
        let path = format!("{prefix}/image_{}.png", image.index);

        match ctx.services.store_image(&path, image.data.clone()).await {
            Ok(()) => match ctx.services.caption_image(&image.data).await {
                Ok(caption) => captioned.push(CaptionedImage {
                    index: image.index,
                    path,
                    caption,
                }),
                Err(err) => warn!(
                    document_id = %ctx.document.id,
                    image_index = image.index,
                    error = %err,
                    "Failed to caption image; skipping"
                ),
            },
            Err(err) => warn!(
                document_id = %ctx.document.id,
                image_index = image.index,
                error = %err,
                "Failed to upload image; skipping"
            ),
        }

        let done = position + 1;
        ctx.tracker
            .advance(
                PipelineStep::Caption,
                caption_progress(done, total),
                Some(caption_eta(done)),
            )
            .await?;
    }

    debug!(
        document_id = %ctx.document.id,
        images = total,
        captioned = captioned.len(),
        "image captioning finished"
    );
    ctx.images_processed = total;
    ctx.images_captioned = captioned.len();
    ctx.captioned_images = captioned;

    machine
        .caption()
        .map_err(|(_, guard)| map_guard_error("caption", &guard))
}

#[instrument(skip_all, fields(document_id = %ctx.document.id))]
pub async fn chunk(
    machine: IngestionMachine<(), Captioned>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    ctx.tracker
        .advance(PipelineStep::Chunk, 50, Some(40))
        .await?;

    let settings = RagSettings::for_user(&ctx.document.user_id, ctx.db).await?;
    let budget = WordBudget::from_tokens(settings.chunk_size, settings.chunk_overlap)?;
    let images = std::mem::take(&mut ctx.captioned_images);
    let planned = plan_chunks(&ctx.extracted()?.text, budget, images);

    if planned.is_empty() {
        return Err(AppError::Extraction(
            "No chunks created - text extraction may have failed".to_string(),
        ));
    }

    debug!(
        document_id = %ctx.document.id,
        chunk_count = planned.len(),
        chunk_words = budget.chunk_words,
        overlap_words = budget.overlap_words,
        "chunks planned"
    );
    ctx.planned_chunks = planned;
    ctx.settings = Some(settings);

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(skip_all, fields(document_id = %ctx.document.id))]
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    ctx.tracker
        .advance(PipelineStep::Embed, 65, Some(30))
        .await?;

    let texts: Vec<String> = ctx
        .planned_chunks
        .iter()
        .map(|chunk| chunk.content.clone())
        .collect();
    let expected = texts.len();
    let model = ctx.settings()?.embedding_model.clone();

    let embeddings = ctx
        .services
        .embed_chunks(&ctx.document, texts, &model)
        .await?;
    if embeddings.len() != expected {
        return Err(AppError::embedding_count_mismatch(
            expected,
            embeddings.len(),
        ));
    }
    ctx.embeddings = embeddings;

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(skip_all, fields(document_id = %ctx.document.id))]
pub async fn save(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Saved>, AppError> {
    ctx.tracker
        .advance(PipelineStep::Save, 85, Some(15))
        .await?;

    let document = &ctx.document;
    let total_chunks = ctx.planned_chunks.len();
    let extracted_text_length = ctx.extracted()?.text.chars().count();
    let planned = std::mem::take(&mut ctx.planned_chunks);
    let embeddings = std::mem::take(&mut ctx.embeddings);

    let chunks: Vec<Chunk> = planned
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(index, (planned, embedding))| {
            let mut chunk = Chunk::new(
                document.id.clone(),
                document.collection_id.clone(),
                document.user_id.clone(),
                index,
                planned.content,
            );
            chunk.embedding = embedding;
            chunk.metadata = json!({
                "file_name": document.file_name,
                "chunk_number": index + 1,
                "total_chunks": total_chunks,
                "file_size": document.file_size,
                "extracted_text_length": extracted_text_length,
                "has_image": planned.image.is_some(),
                "image_index": planned.image.as_ref().map(|image| image.index),
            });
            match planned.image {
                Some(image) => chunk.with_image(image.path, image.caption),
                None => chunk,
            }
        })
        .collect();

    Chunk::replace_for_document(&document.id, chunks, ctx.db).await?;
    ctx.stored_chunks = total_chunks;
    info!(
        document_id = %document.id,
        chunk_count = total_chunks,
        "chunks persisted"
    );

    machine
        .save()
        .map_err(|(_, guard)| map_guard_error("save", &guard))
}

/// Recount persisted chunks. A mismatch is reported, never fatal.
#[instrument(skip_all, fields(document_id = %ctx.document.id))]
pub async fn verify(
    machine: IngestionMachine<(), Saved>,
    ctx: &mut PipelineContext<'_>,
) -> Result<(IngestionMachine<(), Verified>, VerificationStatus), AppError> {
    let persisted = Chunk::count_for_document(ctx.document_id(), ctx.db).await?;
    let status = if persisted == ctx.stored_chunks {
        VerificationStatus::Passed
    } else {
        warn!(
            document_id = %ctx.document.id,
            expected = ctx.stored_chunks,
            persisted,
            "Persisted chunk count does not match planned chunks"
        );
        VerificationStatus::Warning
    };

    let machine = machine
        .verify()
        .map_err(|(_, guard)| map_guard_error("verify", &guard))?;
    Ok((machine, status))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
