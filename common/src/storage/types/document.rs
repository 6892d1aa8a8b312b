use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::{processing_progress::ProcessingProgress, stored_object, StoredObject};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Indexed,
    Failed,
}

stored_object!(Document, "document", {
    collection_id: String,
    user_id: String,
    file_name: String,
    file_path: String,
    file_size: u64,
    mime_type: String,
    status: DocumentStatus,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(
        serialize_with = "crate::storage::types::serde_helpers::serialize_option_datetime",
        deserialize_with = "crate::storage::types::serde_helpers::deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    original_collection_id: Option<String>,
    #[serde(default)]
    processing_progress: Option<ProcessingProgress>,
});

impl Document {
    pub fn new(
        collection_id: String,
        user_id: String,
        file_name: String,
        file_path: String,
        file_size: u64,
        mime_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            collection_id,
            user_id,
            file_name,
            file_path,
            file_size,
            mime_type,
            status: DocumentStatus::Processing,
            error_message: None,
            deleted_at: None,
            original_collection_id: None,
            processing_progress: Some(ProcessingProgress::starting()),
        }
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))
    }

    /// Replace the progress snapshot in one statement so pollers never see a partial update.
    pub async fn write_progress(
        id: &str,
        progress: &ProcessingProgress,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET processing_progress = $progress, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("progress", progress.clone()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn mark_indexed(
        id: &str,
        progress: &ProcessingProgress,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET status = 'indexed', error_message = NONE, processing_progress = $progress, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("progress", progress.clone()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn mark_failed(id: &str, message: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET status = 'failed', error_message = $message, processing_progress = $progress, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("message", message.to_owned()))
            .bind(("progress", ProcessingProgress::failed()))
            .await?
            .check()?;
        Ok(())
    }

    /// Hide the document while remembering where it lived.
    pub async fn soft_delete(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .client
            .query(
                "UPDATE type::thing($table, $id) SET deleted_at = time::now(), original_collection_id = collection_id, updated_at = time::now() RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .await?
            .take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))
    }

    /// Undo a soft delete and queue the document for a fresh ingestion run.
    pub async fn restore(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .client
            .query(
                "UPDATE type::thing($table, $id) SET
                    deleted_at = NONE,
                    collection_id = original_collection_id ?? collection_id,
                    original_collection_id = NONE,
                    status = 'processing',
                    error_message = NONE,
                    processing_progress = $progress,
                    updated_at = time::now()
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("progress", ProcessingProgress::starting()))
            .await?
            .take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))
    }

    /// Remove the row together with every chunk derived from it.
    pub async fn delete_with_chunks(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "BEGIN TRANSACTION;
                 DELETE chunk WHERE document_id = $id;
                 DELETE type::thing($table, $id);
                 COMMIT TRANSACTION;",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .await?
            .check()?;
        Ok(())
    }

    /// Blob Store prefix holding the images extracted from this document.
    pub fn image_prefix(&self) -> String {
        format!("images/{}/{}", self.user_id, self.id)
    }
}
