use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use common::error::AppError;
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// Serve a stored blob behind a signed, expiring URL.
pub async fn download_file(
    State(state): State<ApiState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.signer.verify(&path, query.expires, &query.signature)?;

    if !state.storage.exists(&path).await.map_err(AppError::from)? {
        return Err(ApiError::NotFound(format!("File {path} not found")));
    }
    let data = state.storage.get(&path).await.map_err(AppError::from)?;

    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let file_name = path.rsplit('/').next().unwrap_or(&path).replace('"', "");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{file_name}\""),
            ),
        ],
        data,
    ))
}
