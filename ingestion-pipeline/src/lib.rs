#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod extraction;
pub mod pipeline;
pub mod utils;

pub use extraction::{extract_content, DocumentFormat, EmbeddedImages, ExtractedContent};
pub use pipeline::{
    DefaultPipelineServices, IngestionPipeline, IngestionReport, PipelineServices,
    ProgressTracker,
};
