//! Port to the remote CRUD API.
//!
//! The engine never talks HTTP itself: it drives any [`RemoteApi`] and
//! decides what to do from the kind of [`ApiError`] it gets back.

use std::future::Future;

use api_types::{
    ListQuery, Record,
    recurring::{Generated, ProcessDueReport},
};
use thiserror::Error;

/// Failure of a remote call, classified by the transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The request never got an answer (offline, DNS, timeout, reset).
    #[error("network error: {0}")]
    Connectivity(String),
    /// The server understood the request and refused it.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("server error: {0}")]
    Server(String),
}

impl ApiError {
    /// Connectivity failures are queued locally, everything else surfaces.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classifies a bare error message, for transports that expose nothing
    /// else. Messages mentioning "Network" or "fetch" are connectivity
    /// failures.
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Network") || message.contains("fetch") {
            Self::Connectivity(message)
        } else {
            Self::Server(message)
        }
    }
}

/// The remote API contract, per entity type.
///
/// `create` must accept the optional `local_id` and return the already
/// existing record when it has seen that id before. `delete` may answer
/// [`ApiError::NotFound`] for records that are already gone.
pub trait RemoteApi: Send + Sync {
    fn list<R: Record>(
        &self,
        token: &str,
        query: &ListQuery,
    ) -> impl Future<Output = Result<Vec<R>, ApiError>> + Send;

    fn create<R: Record>(
        &self,
        token: &str,
        draft: &R::Draft,
        local_id: Option<&str>,
    ) -> impl Future<Output = Result<R, ApiError>> + Send;

    fn update<R: Record>(
        &self,
        token: &str,
        id: &str,
        patch: &R::Patch,
    ) -> impl Future<Output = Result<R, ApiError>> + Send;

    fn delete<R: Record>(
        &self,
        token: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Generates one transaction from a recurring template.
    fn generate(
        &self,
        token: &str,
        id: &str,
    ) -> impl Future<Output = Result<Generated, ApiError>> + Send;

    /// Generates every transaction whose template is due.
    fn process_due(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<ProcessDueReport, ApiError>> + Send;
}
