//! The module contains the errors the engine can return.
//!
//! The errors are:
//!
//! - [`Api`] the remote call failed; the wrapped [`ApiError`] says whether it
//!   was a connectivity problem or a rejection.
//! - [`UnknownRecord`] an id matched neither the cache nor a pending create.
//! - [`Corrupt`] a persisted collection could not be decoded.
//!
//!  [`Api`]: EngineError::Api
//!  [`UnknownRecord`]: EngineError::UnknownRecord
//!  [`Corrupt`]: EngineError::Corrupt
use sea_orm::DbErr;
use thiserror::Error;

use crate::remote::ApiError;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("\"{0}\" record not found!")]
    UnknownRecord(String),
    #[error("\"{0}\" exists only on this device, sync it first")]
    NotSynced(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("corrupted \"{key}\" collection: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// `true` when the failure came from the remote API rejecting the call.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api(err) if !err.is_connectivity())
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Api(a), Self::Api(b)) => a == b,
            (Self::UnknownRecord(a), Self::UnknownRecord(b)) => a == b,
            (Self::NotSynced(a), Self::NotSynced(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidDate(a), Self::InvalidDate(b)) => a == b,
            (Self::Corrupt { key: a, .. }, Self::Corrupt { key: b, .. }) => a == b,
            (Self::Json(a), Self::Json(b)) => a.to_string() == b.to_string(),
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
