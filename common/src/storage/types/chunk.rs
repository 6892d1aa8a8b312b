use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{serde_helpers::deserialize_flexible_id, stored_object, StoredObject};

stored_object!(Chunk, "chunk", {
    document_id: String,
    collection_id: String,
    user_id: String,
    chunk_index: usize,
    content: String,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    has_image: bool,
    #[serde(default)]
    image_path: Option<String>,
    #[serde(default)]
    image_caption: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
});

/// A chunk returned by similarity search, without its vector.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScoredChunk {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub document_id: String,
    pub collection_id: String,
    pub chunk_index: usize,
    pub content: String,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub image_caption: Option<String>,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorStats {
    pub total_chunks: usize,
    pub avg_chunk_length: usize,
    pub embedding_dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

#[derive(Deserialize)]
struct ChunkShape {
    content_length: usize,
    dimensions: Option<usize>,
}

impl Chunk {
    pub fn new(
        document_id: String,
        collection_id: String,
        user_id: String,
        chunk_index: usize,
        content: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            collection_id,
            user_id,
            chunk_index,
            content,
            embedding: Vec::new(),
            has_image: false,
            image_path: None,
            image_caption: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Mark this chunk as the description of an extracted image.
    pub fn with_image(mut self, image_path: String, image_caption: String) -> Self {
        self.has_image = true;
        self.image_path = Some(image_path);
        self.image_caption = Some(image_caption);
        self
    }

    /// Swap the document's chunk set for `chunks` in a single transaction.
    ///
    /// Chunks from a previous run are deleted first so re-ingestion never leaves stale vectors.
    pub async fn replace_for_document(
        document_id: &str,
        chunks: Vec<Chunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "BEGIN TRANSACTION;
                 DELETE type::table($table) WHERE document_id = $document_id;
                 INSERT INTO chunk $chunks;
                 COMMIT TRANSACTION;",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .bind(("chunks", chunks))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn count_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        let result: Option<CountResult> = db
            .client
            .query(
                "SELECT count() AS count FROM type::table($table) WHERE document_id = $document_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?
            .take(0)?;
        Ok(result
            .map(|r| usize::try_from(r.count).unwrap_or_default())
            .unwrap_or(0))
    }

    /// Chunks of a document in source order, vectors omitted.
    pub async fn list_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Chunk>, AppError> {
        let chunks: Vec<Chunk> = db
            .client
            .query(
                "SELECT * OMIT embedding FROM type::table($table) WHERE document_id = $document_id ORDER BY chunk_index ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?
            .take(0)?;
        Ok(chunks)
    }

    pub async fn vector_stats(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<VectorStats, AppError> {
        let shapes: Vec<ChunkShape> = db
            .client
            .query(
                "SELECT string::len(content) AS content_length, array::len(embedding) AS dimensions FROM type::table($table) WHERE document_id = $document_id",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?
            .take(0)?;

        let total_chunks = shapes.len();
        let total_length: usize = shapes.iter().map(|s| s.content_length).sum();
        let avg_chunk_length = if total_chunks == 0 {
            0
        } else {
            (total_length as f64 / total_chunks as f64).round() as usize
        };
        let embedding_dimensions = shapes
            .iter()
            .find_map(|s| s.dimensions.filter(|d| *d > 0));

        Ok(VectorStats {
            total_chunks,
            avg_chunk_length,
            embedding_dimensions,
        })
    }

    /// Exact cosine similarity over the chunks of the given collections.
    pub async fn similarity_search(
        embedding: Vec<f32>,
        collection_ids: Vec<String>,
        limit: usize,
        threshold: f32,
        db: &SurrealDbClient,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        if collection_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let results: Vec<ScoredChunk> = db
            .client
            .query(
                "SELECT * FROM (
                    SELECT id, document_id, collection_id, chunk_index, content, has_image, image_path, image_caption,
                        vector::similarity::cosine(embedding, $embedding) AS similarity
                    FROM type::table($table)
                    WHERE collection_id INSIDE $collections AND array::len(embedding) = $dimensions
                 )
                 WHERE similarity >= $threshold
                 ORDER BY similarity DESC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("dimensions", embedding.len()))
            .bind(("embedding", embedding))
            .bind(("collections", collection_ids))
            .bind(("threshold", threshold))
            .bind(("limit", limit))
            .await?
            .take(0)?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn chunk(document_id: &str, collection_id: &str, index: usize, content: &str, embedding: Vec<f32>) -> Chunk {
        let mut chunk = Chunk::new(
            document_id.into(),
            collection_id.into(),
            "user-1".into(),
            index,
            content.into(),
        );
        chunk.embedding = embedding;
        chunk
    }

    #[tokio::test]
    async fn replace_for_document_drops_stale_chunks() {
        let db = setup_db().await;

        let first_run: Vec<Chunk> = (0..10)
            .map(|i| chunk("doc-1", "col-1", i, &format!("old {i}"), vec![1.0, 0.0]))
            .collect();
        Chunk::replace_for_document("doc-1", first_run, &db)
            .await
            .expect("first write");
        Chunk::replace_for_document(
            "doc-2",
            vec![chunk("doc-2", "col-1", 0, "other", vec![1.0, 0.0])],
            &db,
        )
        .await
        .expect("other document");

        let second_run: Vec<Chunk> = (0..7)
            .map(|i| chunk("doc-1", "col-1", i, &format!("new {i}"), vec![0.0, 1.0]))
            .collect();
        Chunk::replace_for_document("doc-1", second_run, &db)
            .await
            .expect("second write");

        assert_eq!(Chunk::count_for_document("doc-1", &db).await.expect("count"), 7);
        assert_eq!(Chunk::count_for_document("doc-2", &db).await.expect("count"), 1);

        let listed = Chunk::list_by_document("doc-1", &db).await.expect("list");
        let indexes: Vec<usize> = listed.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, (0..7).collect::<Vec<_>>());
        assert!(listed.iter().all(|c| c.content.starts_with("new")));
        assert!(listed.iter().all(|c| c.embedding.is_empty()));
    }

    #[tokio::test]
    async fn vector_stats_report_lengths_and_dimensions() {
        let db = setup_db().await;
        Chunk::replace_for_document(
            "doc-1",
            vec![
                chunk("doc-1", "col-1", 0, "abcd", vec![0.1, 0.2, 0.3]),
                chunk("doc-1", "col-1", 1, "abcdefg", vec![0.1, 0.2, 0.3]),
            ],
            &db,
        )
        .await
        .expect("write");

        let stats = Chunk::vector_stats("doc-1", &db).await.expect("stats");
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.avg_chunk_length, 6);
        assert_eq!(stats.embedding_dimensions, Some(3));

        let empty = Chunk::vector_stats("missing", &db).await.expect("stats");
        assert_eq!(empty.total_chunks, 0);
        assert_eq!(empty.embedding_dimensions, None);
    }

    #[tokio::test]
    async fn similarity_search_filters_by_collection_and_threshold() {
        let db = setup_db().await;
        Chunk::replace_for_document(
            "doc-1",
            vec![
                chunk("doc-1", "col-1", 0, "The sky is blue", vec![1.0, 0.0]),
                chunk("doc-1", "col-1", 1, "Grass is green", vec![0.0, 1.0]),
                chunk("doc-1", "col-1", 2, "Sky at dusk", vec![0.8, 0.6]),
            ],
            &db,
        )
        .await
        .expect("write");
        Chunk::replace_for_document(
            "doc-2",
            vec![chunk("doc-2", "col-2", 0, "Unlinked sky", vec![1.0, 0.0])],
            &db,
        )
        .await
        .expect("write");

        let results = Chunk::similarity_search(
            vec![1.0, 0.0],
            vec!["col-1".to_string()],
            10,
            0.5,
            &db,
        )
        .await
        .expect("search");

        let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["The sky is blue", "Sky at dusk"]);
        assert!(results[0].similarity > results[1].similarity);

        let limited = Chunk::similarity_search(vec![1.0, 0.0], vec!["col-1".into()], 1, 0.0, &db)
            .await
            .expect("search");
        assert_eq!(limited.len(), 1);

        let none = Chunk::similarity_search(vec![1.0, 0.0], Vec::new(), 10, 0.0, &db)
            .await
            .expect("search");
        assert!(none.is_empty());
    }
}
