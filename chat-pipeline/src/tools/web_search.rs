//! Web search through the user's default search provider.
//!
//! Every outcome, including provider failures, is returned as text for the model to read.
//! Brave, Serper and Tavily use their public endpoints unless the provider row carries a
//! non-empty `base_url`, which then replaces the endpoint.

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::provider::{ProviderConfig, ProviderKind},
    },
};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const DISABLED: &str =
    "Web search is disabled. Enable it in the chat interface to use this feature.";
pub const NOT_CONFIGURED: &str =
    "No web search provider configured. Please add one in Settings → Web Search.";

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";
const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_RESULTS: usize = 5;

/// Title, link and snippet of a single hit.
#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "link")]
    url: String,
    #[serde(default, alias = "description", alias = "content")]
    snippet: String,
}

#[derive(Debug, Default, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

enum Outcome {
    Results(String),
    /// Returned to the model verbatim, without the synthesis wrapper.
    Message(String),
}

pub async fn run(
    query: &str,
    enabled: bool,
    user_id: &str,
    db: &SurrealDbClient,
    http: &Client,
) -> String {
    if !enabled {
        return DISABLED.to_string();
    }

    match search(query, user_id, db, http).await {
        Ok(Outcome::Results(results)) => wrap_results(query, &results),
        Ok(Outcome::Message(message)) => message,
        Err(err) => {
            warn!(error = %err, "Web search failed");
            format!("Web search error: {err}")
        }
    }
}

async fn search(
    query: &str,
    user_id: &str,
    db: &SurrealDbClient,
    http: &Client,
) -> Result<Outcome, AppError> {
    let Some(provider) = ProviderConfig::find_default(user_id, ProviderKind::WebSearch, db).await?
    else {
        return Ok(Outcome::Message(NOT_CONFIGURED.to_string()));
    };
    debug!(provider = %provider.provider_name, query, "Running web search");

    let outcome = match provider.provider_name.as_str() {
        "brave" => {
            let response = http
                .get(endpoint_or(&provider, BRAVE_ENDPOINT))
                .query(&[("q", query)])
                .header("X-Subscription-Token", &provider.api_key)
                .header("Accept", "application/json")
                .send()
                .await?;
            if !response.status().is_success() {
                return Ok(api_error("Brave Search", &response));
            }
            let body: BraveResponse = response.json().await?;
            Outcome::Results(format_hits(body.web.unwrap_or_default().results))
        }
        "serper" => {
            let response = http
                .post(endpoint_or(&provider, SERPER_ENDPOINT))
                .header("X-API-KEY", &provider.api_key)
                .json(&json!({ "q": query }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Ok(api_error("Serper", &response));
            }
            let body: SerperResponse = response.json().await?;
            Outcome::Results(format_hits(body.organic))
        }
        "tavily" => {
            let response = http
                .post(endpoint_or(&provider, TAVILY_ENDPOINT))
                .json(&json!({
                    "api_key": provider.api_key,
                    "query": query,
                    "max_results": MAX_RESULTS,
                }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Ok(api_error("Tavily", &response));
            }
            let body: TavilyResponse = response.json().await?;
            Outcome::Results(format_hits(body.results))
        }
        "custom" => {
            if provider.base_url.trim().is_empty() {
                return Ok(Outcome::Message(
                    "Custom provider has no API endpoint configured.".to_string(),
                ));
            }
            let response = http
                .post(provider.base_url.trim())
                .bearer_auth(&provider.api_key)
                .json(&json!({ "query": query }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Ok(api_error("Custom provider", &response));
            }
            let body: Value = response.json().await?;
            Outcome::Results(
                serde_json::to_string_pretty(&body)
                    .map_err(|err| AppError::Processing(err.to_string()))?,
            )
        }
        other => Outcome::Message(format!("Unknown provider: {other}")),
    };

    Ok(outcome)
}

fn endpoint_or<'a>(provider: &'a ProviderConfig, default: &'a str) -> &'a str {
    let base = provider.base_url.trim();
    if base.is_empty() {
        default
    } else {
        base
    }
}

fn api_error(label: &str, response: &Response) -> Outcome {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or_else(|| status.as_str());
    Outcome::Message(format!("{label} API error: {reason}"))
}

fn format_hits(hits: Vec<SearchHit>) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }
    hits.into_iter()
        .take(MAX_RESULTS)
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "{}. **[{}]({})**\n   {}",
                i + 1,
                hit.title,
                hit.url,
                hit.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn wrap_results(query: &str, results: &str) -> String {
    format!(
        "Web search results for \"{query}\":\n\n{results}\n\n---\nIMPORTANT: Synthesize this information into a comprehensive, well-written response. Do NOT just list these results. Cite sources naturally in your response and include a \"Sources\" section at the end with clickable links."
    )
}
