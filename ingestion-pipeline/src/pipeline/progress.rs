use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::Document,
            processing_progress::{PipelineStep, ProcessingProgress},
        },
    },
};
use tracing::debug;

/// Writes whole progress snapshots for one document.
///
/// Progress never decreases and the ETA never grows, whatever the stages request.
pub struct ProgressTracker<'a> {
    document_id: String,
    db: &'a SurrealDbClient,
    progress: u8,
    eta: Option<u32>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(document_id: impl Into<String>, db: &'a SurrealDbClient) -> Self {
        Self {
            document_id: document_id.into(),
            db,
            progress: 0,
            eta: None,
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub async fn advance(
        &mut self,
        step: PipelineStep,
        progress: u8,
        eta: Option<u32>,
    ) -> Result<(), AppError> {
        self.progress = self.progress.max(progress.min(100));
        self.eta = match (self.eta, eta) {
            (Some(previous), Some(next)) => Some(previous.min(next)),
            (_, next) => next,
        };

        let snapshot = ProcessingProgress::at_step(step, self.progress, self.eta);
        Document::write_progress(&self.document_id, &snapshot, self.db).await?;

        debug!(
            document_id = %self.document_id,
            step = step.label(),
            progress = self.progress,
            eta = ?self.eta,
            "ingestion progress"
        );
        Ok(())
    }
}

/// Progress after `done` of `total` images have been handled, between 35 and 45.
pub fn caption_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 35;
    }
    let share = done.min(total) * 10 / total;
    35 + u8::try_from(share).unwrap_or(10)
}

/// ETA after `done` images, two seconds less per image from 50.
pub fn caption_eta(done: usize) -> u32 {
    50_u32.saturating_sub(u32::try_from(done.saturating_mul(2)).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use common::storage::types::processing_progress::StepStatus;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn caption_schedule_spans_ten_points() {
        assert_eq!(caption_progress(1, 4), 37);
        assert_eq!(caption_progress(2, 4), 40);
        assert_eq!(caption_progress(4, 4), 45);
        assert_eq!(caption_progress(0, 0), 35);
        assert_eq!(caption_eta(1), 48);
        assert_eq!(caption_eta(30), 0);
    }

    #[tokio::test]
    async fn snapshots_are_clamped_monotonic() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        let document = Document::new(
            "c".into(),
            "u".into(),
            "a.txt".into(),
            "u/c/1-a.txt".into(),
            3,
            "text/plain".into(),
        );
        db.store_item(document.clone()).await.expect("store");

        let mut tracker = ProgressTracker::new(document.id.clone(), &db);
        tracker
            .advance(PipelineStep::Caption, 45, Some(10))
            .await
            .expect("advance");
        tracker
            .advance(PipelineStep::Chunk, 40, Some(40))
            .await
            .expect("advance");

        let stored = Document::get(&document.id, &db)
            .await
            .expect("get")
            .processing_progress
            .expect("progress");
        assert_eq!(stored.progress, 45);
        assert_eq!(stored.eta, Some(10));
        assert_eq!(stored.current_step, "Creating chunks");
        assert_eq!(stored.steps[3].status, StepStatus::Processing);
        assert_eq!(tracker.progress(), 45);
    }
}
