use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use cadence_core::JobId;
use cadence_infra::jobs::{LifecycleError, ServiceError};

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::Lifecycle(LifecycleError::NotFound(_)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "Job not found")
        }
        ServiceError::Lifecycle(LifecycleError::AlreadyTerminal { status, .. }) => json_error(
            StatusCode::CONFLICT,
            "already_terminal",
            format!("Job already {status}"),
        ),
        ServiceError::Lifecycle(LifecycleError::Store(e)) => {
            tracing::error!(error = %e, "record store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "Job storage unavailable")
        }
        ServiceError::NotCompleted { status, .. } => json_error(
            StatusCode::CONFLICT,
            "not_completed",
            format!("Job not completed yet (status {status})"),
        ),
        ServiceError::Queue(e) => {
            tracing::error!(error = %e, "task queue failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", "Job queue unavailable")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_job_id(s: &str) -> Result<JobId, axum::response::Response> {
    s.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "validation_error", "jobId must be a UUID"))
}
