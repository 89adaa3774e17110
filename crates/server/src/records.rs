//! The `records` table: one row per record, body stored as JSON.

use api_types::{ListQuery, Record};
use chrono::Utc;
use sea_orm::{ActiveValue, QueryOrder, Select, entity::prelude::*, sea_query::Expr};

use crate::ServerError;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner: String,
    pub kind: String,
    pub local_id: Option<String>,
    pub occurred_at: DateTimeUtc,
    pub body: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn scoped<R: Record>(owner: &str) -> Select<Entity> {
    Entity::find()
        .filter(Column::Owner.eq(owner))
        .filter(Column::Kind.eq(R::KIND.as_str()))
}

fn decode<R: Record>(model: &Model) -> Result<R, ServerError> {
    Ok(serde_json::from_str(&model.body)?)
}

pub(crate) async fn find<R: Record, C: ConnectionTrait>(
    db: &C,
    owner: &str,
    id: &str,
) -> Result<Option<R>, ServerError> {
    scoped::<R>(owner)
        .filter(Column::Id.eq(id))
        .one(db)
        .await?
        .map(|model| decode(&model))
        .transpose()
}

pub(crate) async fn find_by_local_id<R: Record, C: ConnectionTrait>(
    db: &C,
    owner: &str,
    local_id: &str,
) -> Result<Option<R>, ServerError> {
    scoped::<R>(owner)
        .filter(Column::LocalId.eq(local_id))
        .one(db)
        .await?
        .map(|model| decode(&model))
        .transpose()
}

/// Records of `owner` matching `query`, newest first.
pub(crate) async fn list<R: Record, C: ConnectionTrait>(
    db: &C,
    owner: &str,
    query: &ListQuery,
) -> Result<Vec<R>, ServerError> {
    let mut select = scoped::<R>(owner);
    if let Some(from) = query.from {
        select = select.filter(Column::OccurredAt.gte(from));
    }
    if let Some(to) = query.to {
        select = select.filter(Column::OccurredAt.lte(to));
    }

    let mut records = Vec::new();
    for model in select.order_by_desc(Column::OccurredAt).all(db).await? {
        let record: R = decode(&model)?;
        if query.matches(&record) {
            records.push(record);
        }
    }
    Ok(records)
}

pub(crate) async fn insert<R: Record, C: ConnectionTrait>(
    db: &C,
    owner: &str,
    record: &R,
) -> Result<(), ServerError> {
    let now = Utc::now();
    let model = ActiveModel {
        id: ActiveValue::Set(record.id().to_string()),
        owner: ActiveValue::Set(owner.to_string()),
        kind: ActiveValue::Set(R::KIND.as_str().to_string()),
        local_id: ActiveValue::Set(record.local_id().map(str::to_string)),
        occurred_at: ActiveValue::Set(record.date()),
        body: ActiveValue::Set(serde_json::to_string(record)?),
        created_at: ActiveValue::Set(now),
        updated_at: ActiveValue::Set(now),
    };
    Entity::insert(model).exec_without_returning(db).await?;
    Ok(())
}

/// Rewrites the body of an existing record.
pub(crate) async fn store<R: Record, C: ConnectionTrait>(
    db: &C,
    owner: &str,
    record: &R,
) -> Result<(), ServerError> {
    let result = Entity::update_many()
        .col_expr(Column::Body, Expr::value(serde_json::to_string(record)?))
        .col_expr(Column::OccurredAt, Expr::value(record.date()))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::Owner.eq(owner))
        .filter(Column::Kind.eq(R::KIND.as_str()))
        .filter(Column::Id.eq(record.id()))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServerError::NotFound(record.id().to_string()));
    }
    Ok(())
}

/// Returns whether a row was deleted.
pub(crate) async fn remove<R: Record, C: ConnectionTrait>(
    db: &C,
    owner: &str,
    id: &str,
) -> Result<bool, ServerError> {
    let result = Entity::delete_many()
        .filter(Column::Owner.eq(owner))
        .filter(Column::Kind.eq(R::KIND.as_str()))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}
