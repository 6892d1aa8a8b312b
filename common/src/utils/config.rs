use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Which backend turns text into vectors.
///
/// `Hashed` is deterministic and offline; it exists for development and tests.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAI
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default)]
    pub public_base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    /// Full URL of the default chat completion gateway. Falls back to
    /// `{openai_base_url}/chat/completions`.
    #[serde(default)]
    pub chat_completions_url: Option<String>,
    /// Bearer key for the gateway. Falls back to `openai_api_key`.
    #[serde(default)]
    pub chat_api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub default_chat_model: String,
    #[serde(default = "default_caption_model")]
    pub caption_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl AppConfig {
    pub fn chat_completions_url(&self) -> String {
        self.chat_completions_url.clone().unwrap_or_else(|| {
            format!(
                "{}/chat/completions",
                self.openai_base_url.trim_end_matches('/')
            )
        })
    }

    pub fn chat_api_key(&self) -> &str {
        self.chat_api_key.as_deref().unwrap_or(&self.openai_api_key)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: String::new(),
            surrealdb_database: String::new(),
            http_port: 0,
            public_base_url: String::new(),
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            signing_secret: String::new(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            chat_completions_url: None,
            chat_api_key: None,
            default_chat_model: default_chat_model(),
            caption_model: default_caption_model(),
            embedding_backend: default_embedding_backend(),
            embedding_dimensions: default_embedding_dimensions(),
            assistant_name: default_assistant_name(),
            timezone: default_timezone(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_signed_url_ttl_secs() -> u64 {
    3600
}

fn default_chat_model() -> String {
    "google/gemini-2.5-flash".to_string()
}

fn default_caption_model() -> String {
    "google/gemini-2.5-flash".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_assistant_name() -> String {
    "Assistant".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_falls_back_to_openai_base() {
        let config = AppConfig {
            openai_base_url: "http://localhost:9000/v1/".into(),
            openai_api_key: "sk-test".into(),
            ..Default::default()
        };
        assert_eq!(
            config.chat_completions_url(),
            "http://localhost:9000/v1/chat/completions"
        );
        assert_eq!(config.chat_api_key(), "sk-test");

        let config = AppConfig {
            chat_completions_url: Some("http://gateway/v1/chat/completions".into()),
            chat_api_key: Some("gw-key".into()),
            ..config
        };
        assert_eq!(
            config.chat_completions_url(),
            "http://gateway/v1/chat/completions"
        );
        assert_eq!(config.chat_api_key(), "gw-key");
    }

    #[test]
    fn deserializes_with_defaults_for_optional_fields() {
        let config: AppConfig = Config::builder()
            .set_override("surrealdb_address", "mem://")
            .and_then(|b| b.set_override("surrealdb_username", "root"))
            .and_then(|b| b.set_override("surrealdb_password", "root"))
            .and_then(|b| b.set_override("surrealdb_namespace", "ns"))
            .and_then(|b| b.set_override("surrealdb_database", "db"))
            .and_then(|b| b.set_override("http_port", 3000))
            .and_then(|b| b.set_override("storage", "memory"))
            .and_then(|b| b.set_override("embedding_backend", "hashed"))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize::<AppConfig>())
            .expect("config deserializes");

        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.embedding_backend, EmbeddingBackend::Hashed);
        assert_eq!(config.signed_url_ttl_secs, 3600);
        assert_eq!(config.embedding_dimensions, 1536);
        assert_eq!(config.assistant_name, "Assistant");
        assert_eq!(config.data_dir, "./data");
    }
}
