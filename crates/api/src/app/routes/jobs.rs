//! Submission, status, result and cancel routes, shared by every job kind.
//!
//! Each kind mounts the same four handlers under its own prefix; lookups are
//! scoped to that kind, so a render job id reads as not found under
//! `/api/master`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use cadence_core::JobPayload;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router<P: JobPayload>(submit_path: &str) -> Router {
    Router::new()
        .route(submit_path, post(submit::<P>))
        .route("/status/:job_id", get(status::<P>))
        .route("/result/:job_id", get(result::<P>))
        .route("/cancel/:job_id", post(cancel::<P>))
}

/// POST /api/{kind}/{start|final}
pub async fn submit<P: JobPayload>(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<P>, JsonRejection>,
) -> axum::response::Response {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text());
        }
    };

    match services.jobs.create_job(&payload) {
        Ok(job) => (StatusCode::ACCEPTED, Json(dto::SubmitResponse::from(&job))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /api/{kind}/status/:job_id
pub async fn status<P: JobPayload>(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.get_job_status(P::KIND, job_id) {
        Ok(job) => Json(dto::StatusResponse::from(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /api/{kind}/result/:job_id
pub async fn result<P: JobPayload>(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.get_job_result(P::KIND, job_id) {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /api/{kind}/cancel/:job_id
pub async fn cancel<P: JobPayload>(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.cancel_job(P::KIND, job_id) {
        Ok(job) => Json(dto::CancelResponse::from(&job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
