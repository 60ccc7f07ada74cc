//! Per-job event stream over WebSocket.
//!
//! The connection attaches one hub subscriber for the job and forwards every
//! event as a JSON text frame. Clients may send `{"type":"ping"}` and get
//! `{"type":"pong"}` back; nothing else from the client has meaning. A
//! protocol-level ping goes out every 30 seconds.
//!
//! If the hub detaches the subscriber as a slow consumer the socket is
//! closed; the client reconnects and re-reads job status to resume.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Extension, Path,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use cadence_core::JobId;
use cadence_events::{ControlMessage, NotificationHub};
use cadence_infra::jobs::LifecycleError;

use crate::app::errors;
use crate::app::services::AppServices;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// GET /ws/jobs/:job_id
pub async fn job_stream(
    ws: WebSocketUpgrade,
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match errors::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine.get(job_id) {
        Ok(_) => {}
        Err(LifecycleError::NotFound(_)) => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "Job not found");
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "job lookup failed");
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "Job storage unavailable");
        }
    }

    let hub = services.hub.clone();
    ws.on_upgrade(move |socket| forward_events(socket, hub, job_id))
        .into_response()
}

async fn forward_events(socket: WebSocket, hub: NotificationHub, job_id: JobId) {
    let mut subscription = match hub.attach(job_id) {
        Ok(sub) => sub,
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "event stream unavailable");
            return;
        }
    };
    debug!(job_id = %job_id, subscriber_id = %subscription.id(), "stream client connected");

    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    debug!(job_id = %job_id, "subscriber detached by hub; closing stream");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "failed to encode event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(ControlMessage::Ping) = serde_json::from_str(&text) {
                        let Ok(pong) = serde_json::to_string(&ControlMessage::Pong) else {
                            continue;
                        };
                        if sink.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(job_id = %job_id, "stream client disconnected");
}
