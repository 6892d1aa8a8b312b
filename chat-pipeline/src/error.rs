use common::error::AppError;
use thiserror::Error;

/// Failures that end a chat request before any event is streamed.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Rate limits exceeded, please try again later.")]
    RateLimited,
    #[error("Payment required, please add funds to your AI workspace.")]
    PaymentRequired,
    #[error("Custom provider not found")]
    CustomProviderNotFound,
    #[error("AI gateway error")]
    Gateway(String),
    #[error(transparent)]
    App(#[from] AppError),
}

impl ProviderError {
    /// HTTP status the error is answered with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited => 429,
            Self::PaymentRequired => 402,
            Self::CustomProviderNotFound => 404,
            Self::App(AppError::NotFound(_)) => 404,
            Self::App(AppError::Validation(_)) => 400,
            Self::Gateway(_) | Self::App(_) => 500,
        }
    }

    /// Map a non-success completion status to the matching error.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => Self::RateLimited,
            402 => Self::PaymentRequired,
            _ => Self::Gateway(format!("{status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Gateway(err.to_string())
    }
}

/// A tool invocation that could not produce a result.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArguments(String),
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ToolError {
    /// Result text handed back to the model instead of aborting the chat.
    pub fn into_result(self) -> String {
        format!("Tool error: {self}")
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn provider_statuses_map_to_user_facing_errors() {
        let err = ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert_eq!(err.status_code(), 429);
        assert_eq!(
            err.to_string(),
            "Rate limits exceeded, please try again later."
        );

        let err = ProviderError::from_status(StatusCode::PAYMENT_REQUIRED, String::new());
        assert_eq!(err.status_code(), 402);

        let err = ProviderError::from_status(StatusCode::BAD_GATEWAY, "upstream down".into());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "AI gateway error");

        assert_eq!(ProviderError::CustomProviderNotFound.status_code(), 404);
        assert_eq!(
            ProviderError::App(AppError::NotFound("Chat not found".into())).status_code(),
            404
        );
    }

    #[test]
    fn tool_errors_become_result_strings() {
        let err = ToolError::InvalidArguments("missing query".into());
        assert_eq!(err.into_result(), "Tool error: missing query");
    }
}
