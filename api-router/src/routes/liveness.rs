use axum::Json;
use serde_json::{json, Value};

/// Answers as long as the process can serve requests; never touches the Datastore.
pub async fn live() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
