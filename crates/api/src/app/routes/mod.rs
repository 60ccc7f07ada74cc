use axum::{Router, routing::get};

use cadence_core::{MasterPayload, RenderPayload};

pub mod jobs;
pub mod stream;
pub mod system;

/// Router for every endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/api/render", jobs::router::<RenderPayload>("/start"))
        .nest("/api/master", jobs::router::<MasterPayload>("/final"))
        .route("/ws/jobs/:job_id", get(stream::job_stream))
}
