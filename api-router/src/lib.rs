#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{delete, get, post},
    Router,
};
use routes::{
    chat::chat,
    documents::{
        delete_document, document_chunks, document_status, process_document, restore_document,
        soft_delete_document, upload_document,
    },
    files::download_file,
    liveness::live,
    providers::{create_provider, set_default_provider},
    readiness::ready,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api_state;
pub mod error;
mod routes;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let documents = Router::new()
        .route(
            "/collections/{collection_id}/documents",
            post(upload_document).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/documents/process", post(process_document))
        .route("/documents/{document_id}", delete(delete_document))
        .route("/documents/{document_id}/status", get(document_status))
        .route("/documents/{document_id}/chunks", get(document_chunks))
        .route("/documents/{document_id}/delete", post(soft_delete_document))
        .route("/documents/{document_id}/restore", post(restore_document))
        .route("/files/{*path}", get(download_file));

    let assistant = Router::new()
        .route("/chat", post(chat))
        .route("/providers", post(create_provider))
        .route("/providers/{provider_id}/default", post(set_default_provider));

    probes
        .merge(documents)
        .merge(assistant)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
