use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("{0}")]
    Extraction(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("{0}")]
    Consistency(String),
    #[error("Download error: {0}")]
    Download(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Shorthand for the error raised when the embedding provider answers with a different
    /// number of vectors than inputs were sent.
    pub fn embedding_count_mismatch(expected: usize, got: usize) -> Self {
        Self::Consistency(format!(
            "Embedding count mismatch: expected {expected}, got {got}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_and_consistency_errors_display_their_message_verbatim() {
        let err = AppError::Extraction("No text could be extracted from document".into());
        assert_eq!(err.to_string(), "No text could be extracted from document");

        let err = AppError::embedding_count_mismatch(3, 2);
        assert_eq!(
            err.to_string(),
            "Embedding count mismatch: expected 3, got 2"
        );
    }
}
