//! Streaming transport to chat completion providers.
//!
//! Every provider stream is reduced to a sequence of frame payloads in the OpenAI
//! `choices[0].delta` schema. SSE providers are passed through; Ollama's NDJSON is rewritten.

use std::pin::Pin;

use async_stream::stream;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::provider::ProviderConfig},
    utils::config::AppConfig,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::{error::ProviderError, prompt::ResolvedModel};

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Where a completion request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionTarget {
    Gateway {
        url: String,
        api_key: String,
        model: String,
    },
    OpenAICompatible {
        url: String,
        api_key: String,
        model: String,
    },
    Ollama {
        url: String,
        api_key: String,
        model: String,
    },
}

impl CompletionTarget {
    pub async fn resolve(
        resolved: &ResolvedModel,
        config: &AppConfig,
        db: &SurrealDbClient,
    ) -> Result<Self, ProviderError> {
        let Some(provider_id) = resolved.custom_provider_id() else {
            return Ok(Self::Gateway {
                url: config.chat_completions_url(),
                api_key: config.chat_api_key().to_string(),
                model: resolved.model_id.clone(),
            });
        };

        let provider = match ProviderConfig::get(provider_id, db).await {
            Ok(provider) => provider,
            Err(AppError::NotFound(_)) => return Err(ProviderError::CustomProviderNotFound),
            Err(err) => return Err(err.into()),
        };
        let model = provider
            .model_id
            .clone()
            .unwrap_or_else(|| config.default_chat_model.clone());

        Ok(if provider.provider_name == "ollama" {
            Self::Ollama {
                url: format!("{}/api/chat", provider.base_url.trim_end_matches('/')),
                api_key: provider.api_key,
                model,
            }
        } else {
            Self::OpenAICompatible {
                url: normalize_chat_url(&provider.base_url),
                api_key: provider.api_key,
                model,
            }
        })
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Gateway { url, .. } | Self::OpenAICompatible { url, .. } | Self::Ollama { url, .. } => url,
        }
    }

    fn api_key(&self) -> &str {
        match self {
            Self::Gateway { api_key, .. }
            | Self::OpenAICompatible { api_key, .. }
            | Self::Ollama { api_key, .. } => api_key,
        }
    }

    fn model(&self) -> &str {
        match self {
            Self::Gateway { model, .. }
            | Self::OpenAICompatible { model, .. }
            | Self::Ollama { model, .. } => model,
        }
    }

    pub fn supports_tools(&self) -> bool {
        !matches!(self, Self::Ollama { .. })
    }

    pub fn request_body(&self, messages: &[Value], tools: Option<&[Value]>) -> Value {
        let mut body = json!({
            "model": self.model(),
            "messages": messages,
            "stream": true,
        });
        if let Some(tools) = tools.filter(|tools| self.supports_tools() && !tools.is_empty()) {
            body["tools"] = Value::from(tools.to_vec());
        }
        body
    }
}

/// Append `/v1/chat/completions` unless the URL already ends in `/chat/completions`.
pub fn normalize_chat_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Send a streaming completion request. Non-success statuses fail before any frame is read.
pub async fn open_stream(
    http: &reqwest::Client,
    target: &CompletionTarget,
    messages: &[Value],
    tools: Option<&[Value]>,
) -> Result<FrameStream, ProviderError> {
    let mut request = http
        .post(target.url())
        .json(&target.request_body(messages, tools));
    if !target.api_key().is_empty() {
        request = request.bearer_auth(target.api_key());
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, url = target.url(), body = %body, "Completion provider rejected request");
        return Err(ProviderError::from_status(status, body));
    }
    debug!(url = target.url(), "Completion stream opened");

    let format = if matches!(target, CompletionTarget::Ollama { .. }) {
        WireFormat::Ndjson
    } else {
        WireFormat::Sse
    };
    Ok(frames(response, format))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Sse,
    Ndjson,
}

impl WireFormat {
    fn frame(self, line: &str) -> Option<String> {
        match self {
            Self::Sse => sse_payload(line).map(str::to_string),
            Self::Ndjson => ndjson_frame(line),
        }
    }
}

fn frames(response: reqwest::Response, format: WireFormat) -> FrameStream {
    Box::pin(stream! {
        let mut decoder = LineDecoder::default();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in decoder.push(&chunk) {
                        if let Some(frame) = format.frame(&line) {
                            yield Ok(frame);
                        }
                    }
                }
                Err(err) => {
                    yield Err(ProviderError::from(err));
                    break;
                }
            }
        }

        if let Some(line) = decoder.finish() {
            if let Some(frame) = format.frame(&line) {
                yield Ok(frame);
            }
        }
    })
}

/// Splits a byte stream into lines, holding back a trailing partial line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(position) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=position).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        Some(decode_line(&line))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// The payload of an SSE `data:` line. Comments, blank lines and `[DONE]` yield nothing.
pub fn sse_payload(line: &str) -> Option<&str> {
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data: ")?;
    (data != "[DONE]").then_some(data)
}

/// Rewrite an Ollama `{message: {content}}` line as an OpenAI-style delta frame.
fn ndjson_frame(line: &str) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Some(line.to_string());
    };
    let content = value["message"]["content"].as_str().unwrap_or_default();
    if content.is_empty() {
        return None;
    }
    Some(json!({"choices": [{"delta": {"content": content}}]}).to_string())
}
