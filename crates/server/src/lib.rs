//! Reference backend for pennywise devices.
//!
//! Stores every record as a JSON body scoped by owner and kind, honours the
//! `localId` idempotency key on create and generates transactions from
//! recurring templates.

use api_types::Envelope;
use axum::{Json, http::StatusCode, response::IntoResponse};
use sea_orm::DbErr;

pub use server::{app, run_with_listener, spawn_with_listener};

mod records;
mod recurring;
mod resources;
mod server;

/// Opaque owner key taken from the bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner(pub String);

#[derive(Debug)]
pub enum ServerError {
    NotFound(String),
    Unauthorized,
    Validation(String),
    Database(DbErr),
    Json(serde_json::Error),
    Generic(String),
}

fn status_for_error(err: &ServerError) -> StatusCode {
    match err {
        ServerError::NotFound(_) => StatusCode::NOT_FOUND,
        ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
        ServerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServerError::Database(_) | ServerError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServerError::Generic(_) => StatusCode::BAD_REQUEST,
    }
}

fn message_for_error(err: ServerError) -> String {
    match err {
        ServerError::NotFound(id) => format!("\"{id}\" not found"),
        ServerError::Unauthorized => "missing bearer token".to_string(),
        ServerError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        ServerError::Json(json_err) => {
            tracing::error!("stored record is not valid json: {json_err}");
            "internal server error".to_string()
        }
        ServerError::Validation(message) | ServerError::Generic(message) => message,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = status_for_error(&self);
        let body = Envelope::<()>::error(message_for_error(self));
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for ServerError {
    fn from(value: DbErr) -> Self {
        Self::Database(value)
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
