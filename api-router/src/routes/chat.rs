use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use chat_pipeline::ChatRequest;
use futures::StreamExt;
use tracing::error;

use crate::{api_state::ApiState, error::ApiError};

/// Stream an answer as server-sent events.
///
/// Failures before the first event are plain JSON errors; later failures end the stream.
pub async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::ValidationError("Message cannot be empty".to_string()));
    }

    let mut events = state.orchestrator.start(request).await?;

    let event_stream = stream! {
        while let Some(item) = events.recv().await {
            match item {
                Ok(event) => yield Ok(Event::default().data(event.to_sse_data())),
                Err(err) => {
                    error!(error = %err, "Chat stream failed");
                    yield Err(axum::Error::new(err));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(event_stream.boxed())
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
