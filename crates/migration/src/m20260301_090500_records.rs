use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Records::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Records::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Records::Owner).string().not_null())
                    .col(ColumnDef::new(Records::Kind).string().not_null())
                    .col(ColumnDef::new(Records::LocalId).string())
                    .col(
                        ColumnDef::new(Records::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Records::Body).text().not_null())
                    .col(
                        ColumnDef::new(Records::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Records::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // NULL local ids never collide, so only idempotent creates are unique.
        manager
            .create_index(
                Index::create()
                    .name("uidx-records-owner-kind-local_id")
                    .table(Records::Table)
                    .col(Records::Owner)
                    .col(Records::Kind)
                    .col(Records::LocalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-records-owner-kind-occurred_at")
                    .table(Records::Table)
                    .col(Records::Owner)
                    .col(Records::Kind)
                    .col(Records::OccurredAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Records::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Records {
    Table,
    Id,
    Owner,
    Kind,
    LocalId,
    OccurredAt,
    Body,
    CreatedAt,
    UpdatedAt,
}
