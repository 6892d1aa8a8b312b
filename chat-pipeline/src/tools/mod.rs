pub mod calculator;
pub mod date;
pub mod web_search;

use std::sync::Arc;

use chrono::Utc;
use common::{
    storage::{
        db::SurrealDbClient,
        types::{collection::ChatCollection, rag_settings::RagSettings},
    },
    utils::config::AppConfig,
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::{accumulator::ToolCall, error::ToolError, retrieval::search_chunks};

const EXCERPT_CHARS: usize = 300;
const MAX_EXCERPTS: usize = 5;

/// Which optional tools are offered to the model for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolAvailability {
    pub documents: bool,
    pub web_search: bool,
}

/// Function definitions in the OpenAI `tools` format. Calculator and date are always offered.
pub fn definitions(availability: ToolAvailability) -> Vec<Value> {
    let mut tools = Vec::with_capacity(4);
    if availability.documents {
        tools.push(function(
            "search_documents",
            "Search through the user's RAG document collections for relevant information. Use this when the user asks questions about their documents or uploaded content.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query to find relevant documents"}
                },
                "required": ["query"]
            }),
        ));
    }
    if availability.web_search {
        tools.push(function(
            "web_search",
            "Search the internet for current information. Only use when web search is enabled and user needs up-to-date information not in training data.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query"}
                },
                "required": ["query"]
            }),
        ));
    }
    tools.push(function(
        "calculator",
        "Perform mathematical calculations. Supports basic arithmetic operations.",
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The mathematical expression to evaluate (e.g., '2 + 2', '10 * 5')"
                }
            },
            "required": ["expression"]
        }),
    ));
    tools.push(function(
        "get_current_date",
        "Get the current date and time information.",
        json!({"type": "object", "properties": {}}),
    ));
    tools
}

fn function(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// Runs tool calls on behalf of one chat request.
#[derive(Clone)]
pub struct ToolExecutor {
    pub db: Arc<SurrealDbClient>,
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub user_id: String,
    pub chat_id: String,
    pub web_search_enabled: bool,
    pub settings: RagSettings,
}

impl ToolExecutor {
    /// Result text for a call. Failures are folded into the text as `Tool error: ...`.
    #[instrument(skip_all, fields(chat_id = %self.chat_id, tool = %call.name))]
    pub async fn execute(&self, call: &ToolCall) -> String {
        let args = call.parsed_arguments();
        info!(args = %args, "Executing tool");

        let result = match call.name.as_str() {
            "search_documents" => match required_str(&args, "query") {
                Ok(query) => self.search_documents(query).await,
                Err(err) => Err(err),
            },
            "web_search" => match required_str(&args, "query") {
                Ok(query) => Ok(web_search::run(
                    query,
                    self.web_search_enabled,
                    &self.user_id,
                    &self.db,
                    &self.http,
                )
                .await),
                Err(err) => Err(err),
            },
            "calculator" => required_str(&args, "expression").map(calculator::run),
            "get_current_date" => Ok(date::run(&self.config.timezone, Utc::now())),
            other => Ok(format!("Unknown tool: {other}")),
        };

        result.unwrap_or_else(ToolError::into_result)
    }

    async fn search_documents(&self, query: &str) -> Result<String, ToolError> {
        let collection_ids = ChatCollection::collection_ids_for_chat(&self.chat_id, &self.db).await?;
        if collection_ids.is_empty() {
            return Ok(
                "No document collections linked to this chat. Please link a collection first."
                    .to_string(),
            );
        }

        let chunks = match search_chunks(
            query,
            &self.user_id,
            collection_ids,
            &self.settings,
            &self.config,
            &self.db,
        )
        .await
        {
            Ok(chunks) => chunks,
            Err(common::error::AppError::Embedding(_) | common::error::AppError::OpenAI(_)) => {
                return Ok("Error generating search embedding.".to_string());
            }
            Err(err) => return Err(err.into()),
        };

        if chunks.is_empty() {
            return Ok("No relevant documents found for your query.".to_string());
        }

        let excerpts = chunks
            .iter()
            .take(MAX_EXCERPTS)
            .enumerate()
            .map(|(i, chunk)| {
                let excerpt: String = chunk.content.chars().take(EXCERPT_CHARS).collect();
                format!("[{}] {excerpt}...", i + 1)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(format!(
            "Found {} relevant document chunks:\n\n{excerpts}",
            chunks.len()
        ))
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing required argument: {key}")))
}
