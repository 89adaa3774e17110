//! reqwest transport for the engine's [`RemoteApi`].

use std::time::Duration;

use api_types::{
    CreateRequest, Envelope, ListQuery, Record,
    recurring::{Generated, ProcessDueReport},
};
use engine::{ApiError, RemoteApi};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};

/// Maps an HTTP status and the envelope message to an [`ApiError`].
fn error_for_status(status: u16, message: String) -> ApiError {
    match status {
        401 | 403 => ApiError::Unauthorized(message),
        404 => ApiError::NotFound(message),
        400 | 409 | 422 => ApiError::Validation(message),
        _ => ApiError::Server(message),
    }
}

/// Requests that never got a response are connectivity failures. Anything
/// else falls back to the message heuristic.
fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        ApiError::Connectivity(err.to_string())
    } else {
        ApiError::classify_message(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| AppError::Input(format!("invalid base_url: {err}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http })
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|err| ApiError::Server(format!("invalid base_url: {err}")))
    }

    async fn envelope<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<Envelope<T>, ApiError> {
        let res = request.send().await.map_err(transport_error)?;
        let status = res.status();
        if status.is_success() {
            return res
                .json::<Envelope<T>>()
                .await
                .map_err(|err| ApiError::Server(format!("invalid response: {err}")));
        }

        let message = res
            .json::<Envelope<serde_json::Value>>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| status.to_string());
        Err(error_for_status(status.as_u16(), message))
    }

    async fn data<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<T, ApiError> {
        let envelope = self.envelope::<T>(request).await?;
        envelope.data.ok_or_else(|| {
            ApiError::Server(
                envelope
                    .message
                    .unwrap_or_else(|| "response without data".to_string()),
            )
        })
    }
}

impl RemoteApi for HttpApi {
    async fn list<R: Record>(
        &self,
        token: &str,
        query: &ListQuery,
    ) -> std::result::Result<Vec<R>, ApiError> {
        let endpoint = self.endpoint(R::KIND.path())?;
        let request = self.http.get(endpoint).bearer_auth(token).query(query);
        self.data(request).await
    }

    async fn create<R: Record>(
        &self,
        token: &str,
        draft: &R::Draft,
        local_id: Option<&str>,
    ) -> std::result::Result<R, ApiError> {
        let endpoint = self.endpoint(R::KIND.path())?;
        let payload = CreateRequest {
            draft,
            local_id: local_id.map(str::to_string),
        };
        let request = self.http.post(endpoint).bearer_auth(token).json(&payload);
        self.data(request).await
    }

    async fn update<R: Record>(
        &self,
        token: &str,
        id: &str,
        patch: &R::Patch,
    ) -> std::result::Result<R, ApiError> {
        let endpoint = self.endpoint(&format!("{}/{id}", R::KIND.path()))?;
        let request = self.http.patch(endpoint).bearer_auth(token).json(patch);
        self.data(request).await
    }

    async fn delete<R: Record>(&self, token: &str, id: &str) -> std::result::Result<(), ApiError> {
        let endpoint = self.endpoint(&format!("{}/{id}", R::KIND.path()))?;
        let request = self.http.delete(endpoint).bearer_auth(token);
        self.envelope::<serde_json::Value>(request).await?;
        Ok(())
    }

    async fn generate(&self, token: &str, id: &str) -> std::result::Result<Generated, ApiError> {
        let endpoint = self.endpoint(&format!("recurring/{id}/generate"))?;
        self.data(self.http.post(endpoint).bearer_auth(token)).await
    }

    async fn process_due(&self, token: &str) -> std::result::Result<ProcessDueReport, ApiError> {
        let endpoint = self.endpoint("recurring/process-due")?;
        self.data(self.http.post(endpoint).bearer_auth(token)).await
    }
}
