//! CRUD endpoints shared by expenses, incomes and recurring templates.

use api_types::{CreateRequest, Envelope, ListQuery, NewRecord, Patch, Record};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use sea_orm::SqlErr;
use tracing::debug;
use uuid::Uuid;

use crate::{Owner, ServerError, records, server::ServerState};

pub async fn list<R: Record>(
    Extension(owner): Extension<Owner>,
    State(state): State<ServerState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Envelope<Vec<R>>>, ServerError> {
    let records = records::list::<R, _>(&state.db, &owner.0, &query).await?;
    Ok(Json(Envelope::ok(records)))
}

/// Creates a record. A `localId` already seen for this owner returns the
/// existing record with `200` instead of inserting a duplicate.
pub async fn create<R: Record>(
    Extension(owner): Extension<Owner>,
    State(state): State<ServerState>,
    Json(request): Json<CreateRequest<R::Draft>>,
) -> Result<(StatusCode, Json<Envelope<R>>), ServerError> {
    request.draft.validate().map_err(ServerError::Validation)?;

    if let Some(local_id) = request.local_id.as_deref()
        && let Some(existing) = records::find_by_local_id::<R, _>(&state.db, &owner.0, local_id).await?
    {
        debug!(kind = %R::KIND, local_id, "replayed create, returning existing record");
        return Ok((StatusCode::OK, Json(Envelope::ok(existing))));
    }

    let record = R::from_draft(
        Uuid::new_v4().to_string(),
        request.draft,
        request.local_id.clone(),
        Utc::now(),
    );
    match records::insert(&state.db, &owner.0, &record).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(Envelope::ok(record)))),
        // two replays of the same create raced past the lookup
        Err(ServerError::Database(err))
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
        {
            let local_id = request.local_id.as_deref().unwrap_or_default();
            match records::find_by_local_id::<R, _>(&state.db, &owner.0, local_id).await? {
                Some(existing) => Ok((StatusCode::OK, Json(Envelope::ok(existing)))),
                None => Err(ServerError::Database(err)),
            }
        }
        Err(err) => Err(err),
    }
}

pub async fn update<R: Record>(
    Extension(owner): Extension<Owner>,
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(patch): Json<R::Patch>,
) -> Result<Json<Envelope<R>>, ServerError> {
    patch.validate().map_err(ServerError::Validation)?;

    let mut record = records::find::<R, _>(&state.db, &owner.0, &id)
        .await?
        .ok_or_else(|| ServerError::NotFound(id.clone()))?;
    record.apply(&patch);
    record.touch(Utc::now());
    records::store(&state.db, &owner.0, &record).await?;

    Ok(Json(Envelope::ok(record)))
}

/// Unknown ids answer `404`; devices treat that as already deleted.
pub async fn delete<R: Record>(
    Extension(owner): Extension<Owner>,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<()>>, ServerError> {
    if !records::remove::<R, _>(&state.db, &owner.0, &id).await? {
        return Err(ServerError::NotFound(id));
    }
    Ok(Json(Envelope {
        success: true,
        data: None,
        message: None,
    }))
}
