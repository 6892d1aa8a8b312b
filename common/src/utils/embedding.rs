use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tracing::debug;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::provider::{ProviderConfig, ProviderKind},
    },
    utils::config::{AppConfig, EmbeddingBackend},
};

/// Turns chunk texts into vectors, one batched provider call per request.
#[derive(Clone)]
pub struct EmbeddingClient {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAICompatible {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingClient {
    pub fn new_openai_compatible(base_url: &str, api_key: &str, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url.trim_end_matches('/'));
        Self {
            inner: EmbeddingInner::OpenAICompatible {
                client: Arc::new(Client::with_config(config)),
                model,
            },
        }
    }

    pub fn new_hashed(dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    /// Client for a user: their default enabled embedding provider, else the configured
    /// OpenAI endpoint with `fallback_model`.
    pub async fn for_user(
        user_id: &str,
        fallback_model: &str,
        config: &AppConfig,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if config.embedding_backend == EmbeddingBackend::Hashed {
            return Ok(Self::new_hashed(config.embedding_dimensions as usize));
        }

        match ProviderConfig::find_default(user_id, ProviderKind::Embedding, db).await? {
            Some(provider) => {
                debug!(provider = %provider.provider_name, "Using user embedding provider");
                let model = provider
                    .model_id
                    .clone()
                    .unwrap_or_else(|| fallback_model.to_string());
                Ok(Self::new_openai_compatible(
                    &provider.base_url,
                    &provider.api_key,
                    model,
                ))
            }
            None => Ok(Self::new_openai_compatible(
                &config.openai_base_url,
                &config.openai_api_key,
                fallback_model.to_string(),
            )),
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAICompatible { .. } => "openai",
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embed_batch(vec![text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::embedding_count_mismatch(1, 0))
    }

    /// One vector per input, in input order. A count mismatch is an error, never padded.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let embeddings = match &self.inner {
            EmbeddingInner::Hashed { dimension } => texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect::<Vec<_>>(),
            EmbeddingInner::OpenAICompatible { client, model } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .build()?;

                let response = client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(|err| AppError::Embedding(format!("Embedding provider error: {err}")))?;

                let mut data = response.data;
                data.sort_by_key(|item| item.index);
                data.into_iter().map(|item| item.embedding).collect()
            }
        };

        if embeddings.len() != expected {
            return Err(AppError::embedding_count_mismatch(expected, embeddings.len()));
        }

        debug!(
            count = embeddings.len(),
            dimensions = embeddings.first().map_or(0, Vec::len),
            "Embeddings generated"
        );
        Ok(embeddings)
    }
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    for token in tokens(text) {
        vector[bucket(&token, dim)] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}
