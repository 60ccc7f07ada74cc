use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use crate::app::services::AppServices;

/// GET /health
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let queue = services.queue.stats();
    Json(serde_json::json!({
        "status": "ok",
        "queue": queue,
    }))
}
