use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            provider::{ProviderConfig, ProviderKind},
            user_settings::UserSettings,
        },
    },
    utils::config::AppConfig,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::ToolAvailability;

pub const CUSTOM_MODEL_PREFIX: &str = "custom:";

/// The model a chat request is answered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// A gateway model id, or `custom:{provider_id}`.
    pub model_id: String,
    pub display_name: String,
}

impl ResolvedModel {
    pub fn custom_provider_id(&self) -> Option<&str> {
        self.model_id.strip_prefix(CUSTOM_MODEL_PREFIX)
    }
}

pub fn display_name_for(model_id: &str) -> String {
    match model_id {
        "google/gemini-2.5-flash" => "Gemini 2.5 Flash",
        "google/gemini-2.5-pro" => "Gemini 2.5 Pro",
        "openai/gpt-5" => "GPT-5",
        other => other,
    }
    .to_string()
}

/// The user's selected model, overridden by a default enabled chat provider.
pub async fn resolve_model(
    user_id: &str,
    config: &AppConfig,
    db: &SurrealDbClient,
) -> Result<ResolvedModel, AppError> {
    if let Some(provider) = ProviderConfig::find_default(user_id, ProviderKind::Chat, db).await? {
        return Ok(ResolvedModel {
            model_id: format!("{CUSTOM_MODEL_PREFIX}{}", provider.id),
            display_name: provider.display_name,
        });
    }

    let model_id = UserSettings::selected_model(user_id, db)
        .await?
        .unwrap_or_else(|| config.default_chat_model.clone());
    Ok(ResolvedModel {
        display_name: display_name_for(&model_id),
        model_id,
    })
}

/// A prior conversation turn supplied by the client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

pub fn build_system_prompt(
    assistant_name: &str,
    model_display_name: &str,
    tools: ToolAvailability,
    context_chunks: &[String],
) -> String {
    let documents_tool = if tools.documents {
        "- search_documents: Search the user's uploaded documents (only use when user explicitly asks about their documents)"
    } else {
        ""
    };
    let web_tool = if tools.web_search {
        "- web_search: Search the internet for current information"
    } else {
        ""
    };
    let context = if context_chunks.is_empty() {
        String::new()
    } else {
        format!(
            "\n**Document Context:**\n{}\n\nUse this context to answer questions, but summarize and synthesize - don't recite it verbatim.",
            context_chunks.join("\n\n---\n\n")
        )
    };

    format!(
        r#"You are {assistant_name}, an AI assistant powered by {model_display_name}.

**Your Identity:**
When asked "what are you" or "who are you", respond that you are {assistant_name}, an AI assistant powered by {model_display_name}. Do not say you are trained by Google or any other company - you are {assistant_name}.

**Available Tools:**
{documents_tool}
{web_tool}
- calculator: Perform mathematical calculations
- get_current_date: Get current date and time

**How to Handle Document Information:**
When answering questions about documents:
- NEVER recite or quote large sections of documents unless explicitly asked to do so
- Provide concise, relevant summaries that directly answer the user's question
- Extract only the key information needed to answer the question
- If the user wants the full text, they will specifically ask for it (e.g., "show me the full policy", "give me the complete text")

**How to Handle Web Search Results:**
When you receive web search results, synthesize the information into a clear, comprehensive response. Cite sources naturally in your writing (e.g., "According to [Source Name]...") and include a "Sources" section at the end with clickable links formatted as: **[Title](URL)**

**General Guidelines:**
- Be warm, patient, and helpful - even if users ask similar questions multiple times
- Answer questions directly using your knowledge unless the user specifically asks about their documents or needs current information
- Only use tools when explicitly needed for the request
- Format responses with proper markdown for readability
- Stay conversational and friendly in tone
- Keep responses concise and to the point unless asked for detailed explanations

{context}"#
    )
}

/// System prompt, then prior turns, then the new user message.
pub fn build_messages(system_prompt: String, history: &[ConversationTurn], message: &str) -> Vec<Value> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(json!({"role": "system", "content": system_prompt}));
    messages.extend(
        history
            .iter()
            .map(|turn| json!({"role": turn.role, "content": turn.content})),
    );
    messages.push(json!({"role": "user", "content": message}));
    messages
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    async fn setup_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[test]
    fn prompt_lists_only_available_tools() {
        let prompt = build_system_prompt("Atlas", "GPT-5", ToolAvailability::default(), &[]);
        assert!(prompt.starts_with("You are Atlas, an AI assistant powered by GPT-5."));
        assert!(!prompt.contains("- search_documents"));
        assert!(!prompt.contains("- web_search"));
        assert!(prompt.contains("- calculator: Perform mathematical calculations"));
        assert!(!prompt.contains("**Document Context:**"));

        let prompt = build_system_prompt(
            "Atlas",
            "GPT-5",
            ToolAvailability {
                documents: true,
                web_search: true,
            },
            &["The sky is blue".to_string(), "Grass is green".to_string()],
        );
        assert!(prompt.contains("- search_documents: Search the user's uploaded documents"));
        assert!(prompt.contains("- web_search: Search the internet"));
        assert!(prompt.contains(
            "**Document Context:**\nThe sky is blue\n\n---\n\nGrass is green\n\nUse this context"
        ));
    }

    #[test]
    fn messages_are_ordered_system_history_user() {
        let history = vec![
            ConversationTurn {
                role: "user".into(),
                content: "hi".into(),
            },
            ConversationTurn {
                role: "assistant".into(),
                content: "hello".into(),
            },
        ];
        let messages = build_messages("system".into(), &history, "what now");
        let roles: Vec<&str> = messages
            .iter()
            .map(|m| m["role"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3]["content"], "what now");
    }

    #[test]
    fn known_models_have_display_names() {
        assert_eq!(display_name_for("google/gemini-2.5-pro"), "Gemini 2.5 Pro");
        assert_eq!(display_name_for("meta/llama-4"), "meta/llama-4");
    }

    #[tokio::test]
    async fn default_chat_provider_overrides_selected_model() {
        let db = setup_db().await;
        let config = AppConfig::default();

        let resolved = resolve_model("user-1", &config, &db).await.expect("resolve");
        assert_eq!(resolved.model_id, "google/gemini-2.5-flash");
        assert_eq!(resolved.display_name, "Gemini 2.5 Flash");
        assert_eq!(resolved.custom_provider_id(), None);

        db.store_item(UserSettings::new("user-1".into(), Some("openai/gpt-5".into())))
            .await
            .expect("store settings");
        let resolved = resolve_model("user-1", &config, &db).await.expect("resolve");
        assert_eq!(resolved.display_name, "GPT-5");

        let provider = ProviderConfig::create(
            ProviderConfig::new(
                "user-1".into(),
                ProviderKind::Chat,
                "ollama".into(),
                "Local Llama".into(),
                "http://localhost:11434".into(),
                String::new(),
                Some("llama3".into()),
            ),
            &db,
        )
        .await
        .expect("create provider");
        let resolved = resolve_model("user-1", &config, &db).await.expect("resolve");
        assert_eq!(resolved.custom_provider_id(), Some(provider.id.as_str()));
        assert_eq!(resolved.display_name, "Local Llama");
    }
}
