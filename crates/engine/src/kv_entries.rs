//! SQLite-backed [`KeyValueStore`], one row per key.

use chrono::Utc;
use sea_orm::{ActiveValue, DatabaseConnection, entity::prelude::*, sea_query::OnConflict};

use crate::{ResultEngine, store::KeyValueStore};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "kv_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub value: String,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Durable store over the `kv_entries` table.
///
/// The table is created by the `migration` crate.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    database: DatabaseConnection,
}

impl SqliteStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> ResultEngine<Option<String>> {
        let entry = Entity::find_by_id(key.to_string())
            .one(&self.database)
            .await?;
        Ok(entry.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String) -> ResultEngine<()> {
        let entry = ActiveModel {
            key: ActiveValue::Set(key.to_string()),
            value: ActiveValue::Set(value),
            updated_at: ActiveValue::Set(Utc::now()),
        };
        Entity::insert(entry)
            .on_conflict(
                OnConflict::column(Column::Key)
                    .update_columns([Column::Value, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.database)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> ResultEngine<()> {
        Entity::delete_by_id(key.to_string())
            .exec(&self.database)
            .await?;
        Ok(())
    }
}
