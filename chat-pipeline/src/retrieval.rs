use std::collections::HashSet;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        signed_url::UrlSigner,
        types::{
            chunk::{Chunk, ScoredChunk},
            document::Document,
            rag_settings::RagSettings,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingClient},
};
use serde::Serialize;
use tracing::{debug, warn};

/// A document that contributed context to an answer, as sent in the `sources` event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub download_url: String,
    pub has_image: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_caption: Option<String>,
}

#[derive(Debug, Default)]
pub struct RetrievedContext {
    pub chunks: Vec<String>,
    pub sources: Vec<SourceDocument>,
}

/// Embed `query` with the user's embedding provider and search the given collections.
pub async fn search_chunks(
    query: &str,
    user_id: &str,
    collection_ids: Vec<String>,
    settings: &RagSettings,
    config: &AppConfig,
    db: &SurrealDbClient,
) -> Result<Vec<ScoredChunk>, AppError> {
    let embedding = embed_query(query, user_id, settings, config, db).await?;
    Chunk::similarity_search(
        embedding,
        collection_ids,
        settings.top_k_results,
        settings.match_threshold,
        db,
    )
    .await
}

pub async fn embed_query(
    query: &str,
    user_id: &str,
    settings: &RagSettings,
    config: &AppConfig,
    db: &SurrealDbClient,
) -> Result<Vec<f32>, AppError> {
    EmbeddingClient::for_user(user_id, &settings.embedding_model, config, db)
        .await?
        .embed(query)
        .await
}

/// Context chunks and their source documents for a chat message.
///
/// A failed query embedding degrades to an answer without context.
pub async fn retrieve_context(
    message: &str,
    user_id: &str,
    collection_ids: &[String],
    settings: &RagSettings,
    config: &AppConfig,
    db: &SurrealDbClient,
    signer: &UrlSigner,
) -> Result<RetrievedContext, AppError> {
    if collection_ids.is_empty() {
        return Ok(RetrievedContext::default());
    }

    let embedding = match embed_query(message, user_id, settings, config, db).await {
        Ok(embedding) => embedding,
        Err(err) => {
            warn!(user_id, error = %err, "Failed to embed chat message; answering without context");
            return Ok(RetrievedContext::default());
        }
    };

    let scored = Chunk::similarity_search(
        embedding,
        collection_ids.to_vec(),
        settings.top_k_results,
        settings.match_threshold,
        db,
    )
    .await?;
    debug!(user_id, matches = scored.len(), "Similarity search finished");

    let sources = source_documents(&scored, db, signer).await?;
    let chunks = scored.into_iter().map(|chunk| chunk.content).collect();

    Ok(RetrievedContext { chunks, sources })
}

async fn source_documents(
    scored: &[ScoredChunk],
    db: &SurrealDbClient,
    signer: &UrlSigner,
) -> Result<Vec<SourceDocument>, AppError> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for chunk in scored {
        if !seen.insert(chunk.document_id.as_str()) {
            continue;
        }
        let Some(document) = db.get_item::<Document>(&chunk.document_id).await? else {
            continue;
        };
        let with_image = scored
            .iter()
            .find(|c| c.document_id == document.id && c.has_image);

        sources.push(SourceDocument {
            download_url: signer.sign(&document.file_path),
            id: document.id,
            name: document.file_name,
            size: document.file_size,
            has_image: with_image.is_some(),
            image_path: with_image.and_then(|c| c.image_path.clone()),
            image_caption: with_image.and_then(|c| c.image_caption.clone()),
        });
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use common::storage::types::collection::Collection;
    use uuid::Uuid;

    use super::*;

    const DIM: usize = 64;

    fn hashed_config() -> AppConfig {
        AppConfig {
            embedding_backend: common::utils::config::EmbeddingBackend::Hashed,
            embedding_dimensions: u32::try_from(DIM).expect("dimension fits"),
            ..Default::default()
        }
    }

    async fn seeded_db() -> (SurrealDbClient, Collection, Document) {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        let collection = Collection::new("user-1".into(), "Weather".into());
        db.store_item(collection.clone()).await.expect("store collection");

        let document = Document::new(
            collection.id.clone(),
            "user-1".into(),
            "sky.txt".into(),
            "user-1/weather/sky.txt".into(),
            15,
            "text/plain".into(),
        );
        db.store_item(document.clone()).await.expect("store document");

        let client = EmbeddingClient::new_hashed(DIM);
        let texts = vec![
            "The sky is blue".to_string(),
            "[IMAGE 1] A photo of the sky at noon".to_string(),
        ];
        let vectors = client.embed_batch(texts.clone()).await.expect("embed");
        let mut chunks = Vec::new();
        for (index, (text, vector)) in texts.into_iter().zip(vectors).enumerate() {
            let mut chunk = Chunk::new(
                document.id.clone(),
                collection.id.clone(),
                "user-1".into(),
                index,
                text,
            );
            chunk.embedding = vector;
            if index == 1 {
                chunk = chunk.with_image(
                    format!("{}/image_0.png", document.image_prefix()),
                    "A photo of the sky at noon".into(),
                );
            }
            chunks.push(chunk);
        }
        Chunk::replace_for_document(&document.id, chunks, &db)
            .await
            .expect("store chunks");

        (db, collection, document)
    }

    #[tokio::test]
    async fn retrieves_chunks_and_deduplicated_sources() {
        let (db, collection, document) = seeded_db().await;
        let signer = UrlSigner::new("secret", 60, "http://files.test");
        let settings = RagSettings::defaults_for("user-1");

        let context = retrieve_context(
            "what color is the sky",
            "user-1",
            &[collection.id.clone()],
            &settings,
            &hashed_config(),
            &db,
            &signer,
        )
        .await
        .expect("retrieve");

        assert!(context.chunks.iter().any(|c| c == "The sky is blue"));
        assert_eq!(context.sources.len(), 1);
        let source = &context.sources[0];
        assert_eq!(source.id, document.id);
        assert_eq!(source.name, "sky.txt");
        assert!(source
            .download_url
            .starts_with("http://files.test/api/v1/files/user-1/weather/sky.txt?expires="));

        let json = serde_json::to_value(source).expect("serialize");
        assert_eq!(json["downloadUrl"], source.download_url.as_str());
        assert_eq!(json["size"], 15);
    }

    #[tokio::test]
    async fn unlinked_chats_get_no_context() {
        let (db, _, _) = seeded_db().await;
        let context = retrieve_context(
            "what color is the sky",
            "user-1",
            &[],
            &RagSettings::defaults_for("user-1"),
            &hashed_config(),
            &db,
            &UrlSigner::new("secret", 60, ""),
        )
        .await
        .expect("retrieve");
        assert!(context.chunks.is_empty());
        assert!(context.sources.is_empty());
    }

    #[tokio::test]
    async fn embedding_failures_degrade_to_empty_context() {
        let (db, collection, _) = seeded_db().await;
        let config = AppConfig {
            openai_base_url: "http://127.0.0.1:1/v1".into(),
            ..Default::default()
        };

        let context = retrieve_context(
            "what color is the sky",
            "user-1",
            &[collection.id],
            &RagSettings::defaults_for("user-1"),
            &config,
            &db,
            &UrlSigner::new("secret", 60, ""),
        )
        .await
        .expect("retrieval never fails on embedding errors");
        assert!(context.chunks.is_empty());
    }
}
