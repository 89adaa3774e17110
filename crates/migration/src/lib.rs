pub use sea_orm_migration::prelude::*;

mod m20260301_090000_kv_entries;
mod m20260301_090500_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_090000_kv_entries::Migration),
            Box::new(m20260301_090500_records::Migration),
        ]
    }
}
