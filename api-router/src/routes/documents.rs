use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use common::{
    error::AppError,
    storage::types::{chunk::Chunk, collection::Collection, document::Document},
};
use ingestion_pipeline::{IngestionPipeline, IngestionReport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

const PREVIEW_CHARS: usize = 200;
const INDEX_TYPE: &str = "cosine similarity (exact scan)";

/// Run ingestion without holding the request open.
fn spawn_ingestion(pipeline: Arc<IngestionPipeline>, document_id: String) {
    tokio::spawn(async move {
        if let Err(err) = pipeline.process_document(&document_id).await {
            warn!(document_id = %document_id, error = %err, "Background ingestion failed");
        }
    });
}

pub async fn upload_document(
    State(state): State<ApiState>,
    Path(collection_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let collection = state
        .db
        .get_item::<Collection>(&collection_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("Collection {collection_id} not found")))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::ValidationError(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name).to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::ValidationError("Uploaded file has no name".to_string()))?;
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::ValidationError(err.to_string()))?;
        upload = Some((file_name, content_type, data));
    }

    let (file_name, content_type, data) =
        upload.ok_or_else(|| ApiError::ValidationError("Missing file field".to_string()))?;
    let mime_type = content_type
        .filter(|mime| !mime.is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
    let file_path = format!(
        "{}/{}/{}-{}",
        collection.user_id,
        collection.id,
        Utc::now().timestamp_millis(),
        file_name
    );
    let file_size = u64::try_from(data.len()).unwrap_or(u64::MAX);

    state
        .storage
        .put(&file_path, data)
        .await
        .map_err(AppError::from)?;

    let document = Document::new(
        collection.id,
        collection.user_id,
        file_name,
        file_path,
        file_size,
        mime_type,
    );
    state
        .db
        .store_item(document.clone())
        .await
        .map_err(AppError::from)?;
    info!(document_id = %document.id, file_size, "Document uploaded");

    spawn_ingestion(Arc::clone(&state.pipeline), document.id.clone());

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "documentId": document.id,
            "status": document.status,
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub document_id: String,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    success: bool,
    #[serde(flatten)]
    report: IngestionReport,
}

pub async fn process_document(
    State(state): State<ApiState>,
    Json(request): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match state.pipeline.process_document(&request.document_id).await {
        Ok(report) => Ok(Json(ProcessResponse {
            success: true,
            report,
        })),
        Err(AppError::NotFound(msg)) => Err(ApiError::NotFound(msg)),
        Err(err) => Err(ApiError::InternalError(err.to_string())),
    }
}

pub async fn document_status(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get(&document_id, &state.db).await?;
    let collection_name = state
        .db
        .get_item::<Collection>(&document.collection_id)
        .await
        .map_err(AppError::from)?
        .map(|collection| collection.name);
    let stats = Chunk::vector_stats(&document.id, &state.db).await?;
    let embedding_dimensions = stats
        .embedding_dimensions
        .unwrap_or(state.config.embedding_dimensions as usize);

    Ok(Json(json!({
        "document": {
            "id": document.id,
            "fileName": document.file_name,
            "filePath": document.file_path,
            "fileSize": document.file_size,
            "mimeType": document.mime_type,
            "status": document.status,
            "errorMessage": document.error_message,
            "collectionName": collection_name,
            "collectionId": document.collection_id,
            "userId": document.user_id,
            "createdAt": document.created_at,
            "processingProgress": document.processing_progress,
        },
        "vectorStats": {
            "totalChunks": stats.total_chunks,
            "avgChunkLength": stats.avg_chunk_length,
            "embeddingDimensions": embedding_dimensions,
            "indexType": INDEX_TYPE,
        }
    })))
}

pub async fn document_chunks(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Document::get(&document_id, &state.db).await?;
    let chunks = Chunk::list_by_document(&document_id, &state.db).await?;

    let chunks: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            json!({
                "id": chunk.id,
                "chunkIndex": chunk.chunk_index,
                "contentPreview": content_preview(&chunk.content),
                "tokenLength": token_length(&chunk.content),
                "content": chunk.content,
                "metadata": chunk.metadata,
            })
        })
        .collect();

    Ok(Json(json!({ "chunks": chunks })))
}

fn content_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let preview: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{preview}...")
}

/// Rough token estimate: 1.3 tokens per word, rounded up.
fn token_length(content: &str) -> usize {
    let words = content.split_whitespace().count();
    words.saturating_mul(13).div_ceil(10)
}

pub async fn soft_delete_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::soft_delete(&document_id, &state.db).await?;
    info!(document_id = %document.id, "Document moved to trash");
    Ok(Json(json!({
        "success": true,
        "deletedAt": document.deleted_at,
        "originalCollectionId": document.original_collection_id,
    })))
}

pub async fn restore_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::restore(&document_id, &state.db).await?;
    info!(document_id = %document.id, "Document restored; reprocessing");
    spawn_ingestion(Arc::clone(&state.pipeline), document.id.clone());
    Ok(Json(json!({
        "success": true,
        "collectionId": document.collection_id,
        "status": document.status,
    })))
}

/// Remove the blob, extracted images, chunks and the row itself.
pub async fn delete_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get(&document_id, &state.db).await?;

    if let Err(err) = state.storage.delete(&document.file_path).await {
        warn!(document_id = %document.id, error = %err, "Failed to delete document blob");
    }
    if let Err(err) = state.storage.delete_prefix(&document.image_prefix()).await {
        warn!(document_id = %document.id, error = %err, "Failed to delete document images");
    }
    Document::delete_with_chunks(&document.id, &state.db).await?;
    info!(document_id = %document.id, "Document permanently deleted");

    Ok(StatusCode::NO_CONTENT)
}
