#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod accumulator;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod tools;
pub mod transport;

pub use error::{ProviderError, ToolError};
pub use orchestrator::{ChatEvent, ChatOrchestrator, ChatRequest};
pub use prompt::ConversationTurn;
pub use retrieval::SourceDocument;
