//! Transaction generation from recurring templates.

use api_types::{
    Envelope, ListQuery, Record,
    recurring::{Generated, GeneratedTransaction, ProcessDueReport, RecurringTemplate},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use engine::recurrence;
use sea_orm::{ConnectionTrait, TransactionTrait};
use tracing::info;
use uuid::Uuid;

use crate::{Owner, ServerError, records, server::ServerState};

macro_rules! with_tx {
    ($db:expr, |$tx:ident| $body:expr) => {{
        let $tx = $db.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

/// Inserts `record` unless one with the same local id already exists, in
/// which case the stored one is returned.
async fn insert_once<R: Record, C: ConnectionTrait>(
    db: &C,
    owner: &str,
    record: R,
) -> Result<R, ServerError> {
    if let Some(local_id) = record.local_id()
        && let Some(existing) = records::find_by_local_id::<R, _>(db, owner, local_id).await?
    {
        return Ok(existing);
    }
    records::insert(db, owner, &record).await?;
    Ok(record)
}

/// Materializes the template's current occurrence and advances it.
async fn generate_occurrence<C: ConnectionTrait>(
    db: &C,
    owner: &str,
    template: &mut RecurringTemplate,
    now: DateTime<Utc>,
) -> Result<GeneratedTransaction, ServerError> {
    let occurrence = template.next_due_date;
    let transaction =
        match recurrence::materialize(template, occurrence, Uuid::new_v4().to_string(), now) {
            GeneratedTransaction::Expense(expense) => {
                GeneratedTransaction::Expense(insert_once(db, owner, expense).await?)
            }
            GeneratedTransaction::Income(income) => {
                GeneratedTransaction::Income(insert_once(db, owner, income).await?)
            }
        };
    recurrence::advance(template, occurrence);
    template.touch(now);
    Ok(transaction)
}

pub async fn generate(
    Extension(owner): Extension<Owner>,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Generated>>, ServerError> {
    let generated = with_tx!(state.db, |tx| {
        let mut template = records::find::<RecurringTemplate, _>(&tx, &owner.0, &id)
            .await?
            .ok_or_else(|| ServerError::NotFound(id.clone()))?;
        if !template.active {
            return Err(ServerError::Validation(format!(
                "recurring template \"{id}\" is paused"
            )));
        }

        let transaction = generate_occurrence(&tx, &owner.0, &mut template, Utc::now()).await?;
        records::store(&tx, &owner.0, &template).await?;
        Ok::<_, ServerError>(Generated {
            template,
            transaction,
        })
    })?;

    Ok(Json(Envelope::ok(generated)))
}

/// Catches every active template up to today.
pub async fn process_due(
    Extension(owner): Extension<Owner>,
    State(state): State<ServerState>,
) -> Result<Json<Envelope<ProcessDueReport>>, ServerError> {
    let now = Utc::now();
    let today = now.date_naive();

    let report = with_tx!(state.db, |tx| {
        let mut report = ProcessDueReport::default();
        let templates =
            records::list::<RecurringTemplate, _>(&tx, &owner.0, &ListQuery::default()).await?;
        for mut template in templates {
            let due = recurrence::due_occurrences(&template, today);
            if due.is_empty() {
                continue;
            }
            for _ in &due {
                let transaction = generate_occurrence(&tx, &owner.0, &mut template, now).await?;
                report.generated.push(transaction);
            }
            records::store(&tx, &owner.0, &template).await?;
            report.templates.push(template);
        }
        Ok::<_, ServerError>(report)
    })?;

    info!(
        generated = report.generated.len(),
        templates = report.templates.len(),
        "processed due recurring templates"
    );
    Ok(Json(Envelope::ok(report)))
}
