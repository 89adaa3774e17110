mod common;

use std::sync::Arc;

use api_types::expense::{ExpenseNew, ExpensePatch};
use chrono::{TimeZone, Utc};
use common::{FakeApi, TOKEN};
use engine::{KeyValueStore, Mutation, SqliteStore, SyncEngine};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

async fn store_with_db() -> (SqliteStore, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    (SqliteStore::new(db.clone()), db)
}

fn coffee() -> ExpenseNew {
    ExpenseNew {
        amount_minor: 350,
        category: "coffee".to_string(),
        description: None,
        payment_method: Some("card".to_string()),
        date: Utc.with_ymd_and_hms(2024, 2, 10, 8, 30, 0).unwrap(),
    }
}

#[tokio::test]
async fn set_overwrites_and_remove_deletes() {
    let (store, _db) = store_with_db().await;

    assert_eq!(store.get("k").await.unwrap(), None);
    store.set("k", "[1]".to_string()).await.unwrap();
    store.set("k", "[1,2]".to_string()).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("[1,2]"));

    store.remove("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
    store.remove("k").await.unwrap();
}

#[tokio::test]
async fn queues_survive_a_restart() {
    let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();
    let path = root.join(format!("device_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let api = Arc::new(FakeApi::default());
    api.set_offline(true);
    let pending_id = {
        let db = Database::connect(&url).await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let engine = SyncEngine::builder(Arc::new(SqliteStore::new(db.clone())), api.clone()).build();

        let Mutation::Offline(pending) = engine.expenses().create(TOKEN, coffee()).await.unwrap()
        else {
            panic!("expected an offline create");
        };
        engine
            .expenses()
            .update(TOKEN, "srv-9", ExpensePatch {
                amount_minor: Some(400),
                ..Default::default()
            })
            .await
            .unwrap();
        db.close().await.unwrap();
        pending.id
    };

    let db = Database::connect(&url).await.unwrap();
    let engine = SyncEngine::builder(Arc::new(SqliteStore::new(db)), api.clone()).build();
    let counts = engine.pending_counts().await.unwrap();
    assert_eq!(counts.expense.creates, 1);
    assert_eq!(counts.expense.updates, 1);

    let creates = engine.expenses().queues().creates().await.unwrap();
    assert_eq!(creates[0].id, pending_id);
    assert_eq!(creates[0].payload, coffee());

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn namespaces_keep_devices_apart() {
    let (store, _db) = store_with_db().await;
    let store = Arc::new(store);
    let api = Arc::new(FakeApi::default());
    api.set_offline(true);

    let first = SyncEngine::builder(store.clone(), api.clone())
        .namespace("alice")
        .build();
    let second = SyncEngine::builder(store, api).namespace("bob").build();

    first.expenses().create(TOKEN, coffee()).await.unwrap();
    assert_eq!(first.pending_counts().await.unwrap().total(), 1);
    assert_eq!(second.pending_counts().await.unwrap().total(), 0);
}
