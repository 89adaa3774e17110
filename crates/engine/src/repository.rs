//! Named JSON collections over a [`KeyValueStore`].

use std::{marker::PhantomData, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use crate::{EngineError, ResultEngine, store::KeyValueStore};

/// One collection persisted as a JSON array under a single key.
///
/// A missing key loads as an empty collection. A present but undecodable
/// value is an error: overwriting it would silently drop queued work.
#[derive(Debug)]
pub struct Repository<S, T> {
    store: Arc<S>,
    key: String,
    _items: PhantomData<fn() -> T>,
}

impl<S: KeyValueStore, T: Serialize + DeserializeOwned> Repository<S, T> {
    pub fn new(store: Arc<S>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _items: PhantomData,
        }
    }

    pub async fn load(&self) -> ResultEngine<Vec<T>> {
        match self.store.get(&self.key).await? {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(&raw).map_err(|source| EngineError::Corrupt {
                    key: self.key.clone(),
                    source,
                })
            }
            _ => Ok(Vec::new()),
        }
    }

    pub async fn save(&self, items: &[T]) -> ResultEngine<()> {
        let raw = serde_json::to_string(items)?;
        self.store.set(&self.key, raw).await
    }

    pub async fn clear(&self) -> ResultEngine<()> {
        self.store.remove(&self.key).await
    }
}

/// Storage key of one collection: `<namespace>:<kind>:<name>`.
pub(crate) fn collection_key(namespace: &str, kind: api_types::EntityKind, name: &str) -> String {
    format!("{namespace}:{kind}:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn missing_key_loads_empty() {
        let repo: Repository<_, u32> = Repository::new(Arc::new(MemoryStore::new()), "numbers");
        assert!(repo.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_keeps_order() {
        let repo = Repository::new(Arc::new(MemoryStore::new()), "numbers");
        repo.save(&[3u32, 1, 2]).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.set("numbers", "{not json".to_string()).await.unwrap();
        let repo: Repository<_, u32> = Repository::new(store, "numbers");

        let err = repo.load().await.unwrap_err();
        assert!(matches!(err, EngineError::Corrupt { ref key, .. } if key == "numbers"));
    }
}
