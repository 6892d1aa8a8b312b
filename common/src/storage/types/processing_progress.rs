use serde::{Deserialize, Serialize};

/// The six named stages of document ingestion, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Download,
    Extract,
    Caption,
    Chunk,
    Embed,
    Save,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 6] = [
        PipelineStep::Download,
        PipelineStep::Extract,
        PipelineStep::Caption,
        PipelineStep::Chunk,
        PipelineStep::Embed,
        PipelineStep::Save,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PipelineStep::Download => "Downloading file",
            PipelineStep::Extract => "Extracting text & images",
            PipelineStep::Caption => "Captioning images",
            PipelineStep::Chunk => "Creating chunks",
            PipelineStep::Embed => "Generating embeddings",
            PipelineStep::Save => "Saving to database",
        }
    }

    fn position(self) -> usize {
        Self::ALL
            .iter()
            .position(|step| *step == self)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressStep {
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Passed,
    Warning,
}

/// Snapshot of a document's ingestion state, always written whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingProgress {
    pub current_step: String,
    pub progress: u8,
    pub eta: Option<u32>,
    pub steps: Vec<ProgressStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<VerificationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_captioned: Option<usize>,
}

impl ProcessingProgress {
    fn with_steps(current_step: &str, progress: u8, eta: Option<u32>, steps: Vec<ProgressStep>) -> Self {
        Self {
            current_step: current_step.to_owned(),
            progress,
            eta,
            steps,
            processing_time: None,
            verification_status: None,
            images_processed: None,
            images_captioned: None,
        }
    }

    fn steps_with(status_for: impl Fn(usize) -> StepStatus) -> Vec<ProgressStep> {
        PipelineStep::ALL
            .iter()
            .enumerate()
            .map(|(index, step)| ProgressStep {
                name: step.label().to_owned(),
                status: status_for(index),
            })
            .collect()
    }

    /// Queued for ingestion, nothing has run yet.
    pub fn starting() -> Self {
        Self::with_steps("Starting", 0, None, Self::steps_with(|_| StepStatus::Pending))
    }

    /// `step` is running; earlier steps are completed, later ones pending.
    pub fn at_step(step: PipelineStep, progress: u8, eta: Option<u32>) -> Self {
        let current = step.position();
        let steps = Self::steps_with(|index| match index.cmp(&current) {
            std::cmp::Ordering::Less => StepStatus::Completed,
            std::cmp::Ordering::Equal => StepStatus::Processing,
            std::cmp::Ordering::Greater => StepStatus::Pending,
        });
        Self::with_steps(step.label(), progress.min(100), eta, steps)
    }

    pub fn completed(
        processing_time_secs: u64,
        verification_status: VerificationStatus,
        images_processed: usize,
        images_captioned: usize,
    ) -> Self {
        Self {
            processing_time: Some(processing_time_secs),
            verification_status: Some(verification_status),
            images_processed: Some(images_processed),
            images_captioned: Some(images_captioned),
            ..Self::with_steps(
                "Completed",
                100,
                Some(0),
                Self::steps_with(|_| StepStatus::Completed),
            )
        }
    }

    /// Terminal snapshot written when ingestion fails; the cause lives in `error_message`.
    pub fn failed() -> Self {
        Self::with_steps("Failed", 0, None, Vec::new())
    }
}
