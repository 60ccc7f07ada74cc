//! Shared JSON-over-HTTP plumbing for collaborator clients.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::CollaboratorError;

/// Longest response body kept in a [`CollaboratorError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Minimal JSON client bound to one base URL.
#[derive(Clone)]
pub struct JsonHttp {
    service: &'static str,
    client: reqwest::Client,
    base_url: String,
    bearer: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for JsonHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonHttp")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl JsonHttp {
    pub fn new(service: &'static str, base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            service,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: None,
            timeout,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CollaboratorError> {
        let url = self.url(path);
        self.send("GET", &url, self.client.get(&url)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, CollaboratorError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        self.send("POST", &url, self.client.post(&url).json(body)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &'static str,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CollaboratorError> {
        let request = match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        debug!(service = self.service, method, url, "collaborator request");
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        debug!(service = self.service, method, url, status = status.as_u16(), "collaborator response");

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        serde_json::from_str(&body).map_err(|e| CollaboratorError::Decode(e.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> CollaboratorError {
        if err.is_timeout() {
            CollaboratorError::Timeout(self.timeout)
        } else {
            CollaboratorError::Http(err)
        }
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
