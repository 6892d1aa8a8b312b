use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{error::AppError, utils::config::AppConfig};
use tracing::debug;

pub const CAPTION_INSTRUCTION: &str = "Describe this image in detail for document search purposes. Include any text, diagrams, charts, or key visual elements.";

/// Caption used when the model answers without any text.
const FALLBACK_CAPTION: &str = "Image";

/// Vision-model client that turns extracted images into searchable descriptions.
#[derive(Clone)]
pub struct ImageCaptioner {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl ImageCaptioner {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(config.openai_base_url.trim_end_matches('/'));
        Self::new(
            Arc::new(Client::with_config(openai_config)),
            config.caption_model.clone(),
        )
    }

    pub async fn caption(&self, image_bytes: &[u8]) -> Result<String, AppError> {
        let image_url = format!("data:image/png;base64,{}", STANDARD.encode(image_bytes));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(1024_u32)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(CAPTION_INSTRUCTION)
                        .build()?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(image_url)
                                .detail(ImageDetail::High)
                                .build()?,
                        )
                        .build()?
                        .into(),
                ])
                .build()?
                .into()])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let caption = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(FALLBACK_CAPTION)
            .to_string();

        debug!(model = %self.model, caption_chars = caption.chars().count(), "Captioned image");
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::*;

    async fn spawn_vision_server(content: Option<&'static str>) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| async move {
                let parts = &body["messages"][0]["content"];
                assert_eq!(parts[0]["text"], CAPTION_INSTRUCTION);
                let url = parts[1]["image_url"]["url"].as_str().unwrap_or_default();
                assert!(url.starts_with("data:image/png;base64,"));

                Json(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1_700_000_000,
                    "model": "vision-test",
                    "choices": [{
                        "index": 0,
                        "message": { "role": "assistant", "content": content },
                        "finish_reason": "stop"
                    }]
                }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}/v1")
    }

    fn captioner(base: &str) -> ImageCaptioner {
        ImageCaptioner::from_config(&AppConfig {
            openai_base_url: base.to_string(),
            openai_api_key: "sk-test".into(),
            caption_model: "vision-test".into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn returns_model_description() {
        let base = spawn_vision_server(Some("  A pie chart of revenue by region. ")).await;
        let caption = captioner(&base)
            .caption(b"\x89PNG fake")
            .await
            .expect("caption");
        assert_eq!(caption, "A pie chart of revenue by region.");
    }

    #[tokio::test]
    async fn empty_answer_falls_back_to_generic_caption() {
        let base = spawn_vision_server(None).await;
        let caption = captioner(&base).caption(b"img").await.expect("caption");
        assert_eq!(caption, "Image");
    }

    #[tokio::test]
    async fn unreachable_provider_is_an_error() {
        let caption = captioner("http://127.0.0.1:9/v1").caption(b"img").await;
        assert!(caption.is_err());
    }
}
