use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::storage::types::provider::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProviderRequest {
    pub user_id: String,
    pub kind: ProviderKind,
    pub provider_name: String,
    pub display_name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// Provider as returned to clients; the API key never leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderView {
    pub id: String,
    pub user_id: String,
    pub kind: ProviderKind,
    pub provider_name: String,
    pub display_name: String,
    pub base_url: String,
    pub model_id: Option<String>,
    pub is_default: bool,
    pub is_enabled: bool,
}

impl From<ProviderConfig> for ProviderView {
    fn from(provider: ProviderConfig) -> Self {
        Self {
            id: provider.id,
            user_id: provider.user_id,
            kind: provider.kind,
            provider_name: provider.provider_name,
            display_name: provider.display_name,
            base_url: provider.base_url,
            model_id: provider.model_id,
            is_default: provider.is_default,
            is_enabled: provider.is_enabled,
        }
    }
}

pub async fn create_provider(
    State(state): State<ApiState>,
    Json(request): Json<CreateProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.user_id.trim().is_empty() || request.provider_name.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "userId and providerName are required".to_string(),
        ));
    }

    let provider = ProviderConfig::new(
        request.user_id,
        request.kind,
        request.provider_name.trim().to_lowercase(),
        request.display_name,
        request.base_url,
        request.api_key,
        request.model_id.filter(|model| !model.is_empty()),
    );
    let provider = ProviderConfig::create(provider, &state.db).await?;
    info!(provider_id = %provider.id, kind = ?provider.kind, "Provider created");

    Ok((StatusCode::CREATED, Json(ProviderView::from(provider))))
}

pub async fn set_default_provider(
    State(state): State<ApiState>,
    Path(provider_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = ProviderConfig::set_default(&provider_id, &state.db).await?;
    Ok(Json(ProviderView::from(provider)))
}
