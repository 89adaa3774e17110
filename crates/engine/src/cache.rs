//! Last server-confirmed snapshot per entity type.

use std::sync::Arc;

use api_types::Record;
use chrono::{DateTime, Utc};

use crate::{
    ResultEngine,
    repository::{Repository, collection_key},
    store::KeyValueStore,
};

/// Replaced wholesale on every successful fetch. Pending changes are never
/// folded into it; that happens in the merged view only.
#[derive(Debug)]
pub struct ServerCache<S, R> {
    records: Repository<S, R>,
    refreshed_at: Repository<S, DateTime<Utc>>,
}

impl<S: KeyValueStore, R: Record> ServerCache<S, R> {
    pub fn new(store: Arc<S>, namespace: &str) -> Self {
        Self {
            records: Repository::new(
                store.clone(),
                collection_key(namespace, R::KIND, "server_cache"),
            ),
            refreshed_at: Repository::new(
                store,
                collection_key(namespace, R::KIND, "server_cache_at"),
            ),
        }
    }

    pub async fn load(&self) -> ResultEngine<Vec<R>> {
        self.records.load().await
    }

    pub async fn replace(&self, records: &[R]) -> ResultEngine<()> {
        self.replace_at(records, Utc::now()).await
    }

    pub async fn replace_at(&self, records: &[R], now: DateTime<Utc>) -> ResultEngine<()> {
        self.records.save(records).await?;
        self.refreshed_at.save(&[now]).await
    }

    /// When the snapshot was last replaced, `None` if never fetched.
    pub async fn refreshed_at(&self) -> ResultEngine<Option<DateTime<Utc>>> {
        Ok(self.refreshed_at.load().await?.into_iter().next())
    }

    pub async fn clear(&self) -> ResultEngine<()> {
        self.records.clear().await?;
        self.refreshed_at.clear().await
    }
}
