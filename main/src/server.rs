use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{storage::store::StorageManager, utils::config::get_config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let storage = StorageManager::new(&config).await?;
    info!(
        storage = ?storage.backend_kind(),
        embedding_backend = ?config.embedding_backend,
        embedding_dimensions = config.embedding_dimensions,
        "Blob Store and embedding backend configured"
    );

    let api_state = ApiState::new(&config, storage).await?;
    let app = app(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(api_state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(AppState { api_state })
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
