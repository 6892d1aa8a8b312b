use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_pipeline::ProviderError;
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited => Self::TooManyRequests(err.to_string()),
            ProviderError::PaymentRequired => Self::PaymentRequired(err.to_string()),
            ProviderError::CustomProviderNotFound => Self::NotFound(err.to_string()),
            ProviderError::Gateway(ref detail) => {
                tracing::error!(detail = %detail, "Completion provider error");
                Self::InternalError(err.to_string())
            }
            ProviderError::App(app) => app.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::PaymentRequired(message) => (StatusCode::PAYMENT_REQUIRED, message),
            Self::TooManyRequests(message) => (StatusCode::TOO_MANY_REQUESTS, message),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}
