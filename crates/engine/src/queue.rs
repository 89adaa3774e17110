//! Pending operation queues.
//!
//! Every entity type owns three persisted queues: creates, updates and
//! deletes. Queues only grow at the tail and shrink by removal, so the
//! oldest entry is always replayed first.

use std::{collections::HashSet, sync::Arc};

use api_types::{ApplyTo, EntityKind, Patch, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    ResultEngine,
    repository::{Repository, collection_key},
    store::KeyValueStore,
};

/// Prefix of every id generated on the device.
pub const LOCAL_ID_PREFIX: &str = "offline_";

/// Returns `true` for ids generated by [`local_id`].
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// `offline_<kind>_<epochMillis>`.
pub fn local_id(kind: EntityKind, epoch_millis: i64) -> String {
    format!("{LOCAL_ID_PREFIX}{kind}_{epoch_millis}")
}

/// A record created while offline. `id` doubles as the idempotency key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCreate<D> {
    pub id: String,
    pub payload: D,
    pub created_at: DateTime<Utc>,
    /// Bumped by every amendment, so a sync can tell whether the payload it
    /// sent is still the latest one.
    #[serde(default)]
    pub revision: u32,
}

/// Accumulated changes to one server record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate<P> {
    pub id: String,
    pub data: P,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub id: String,
}

/// Number of entries per queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

/// The three queues of one entity type.
///
/// Each read-modify-write cycle holds `guard`, so two tasks enqueuing at the
/// same time cannot overwrite each other's entry. The guard also holds the
/// local ids discarded while their create may be in flight.
#[derive(Debug)]
pub struct PendingQueues<S, R: Record> {
    creates: Repository<S, PendingCreate<R::Draft>>,
    updates: Repository<S, PendingUpdate<R::Patch>>,
    deletes: Repository<S, PendingDelete>,
    guard: Mutex<HashSet<String>>,
}

impl<S: KeyValueStore, R: Record> PendingQueues<S, R> {
    pub fn new(store: Arc<S>, namespace: &str) -> Self {
        Self {
            creates: Repository::new(
                store.clone(),
                collection_key(namespace, R::KIND, "pending_creates"),
            ),
            updates: Repository::new(
                store.clone(),
                collection_key(namespace, R::KIND, "pending_updates"),
            ),
            deletes: Repository::new(store, collection_key(namespace, R::KIND, "pending_deletes")),
            guard: Mutex::new(HashSet::new()),
        }
    }

    pub async fn enqueue_create(&self, payload: R::Draft) -> ResultEngine<PendingCreate<R::Draft>> {
        self.enqueue_create_at(payload, Utc::now()).await
    }

    /// Appends a create stamped with `now`.
    ///
    /// Two creates in the same millisecond would share an id, so the
    /// millisecond part is bumped until the id is free.
    pub async fn enqueue_create_at(
        &self,
        payload: R::Draft,
        now: DateTime<Utc>,
    ) -> ResultEngine<PendingCreate<R::Draft>> {
        let _guard = self.guard.lock().await;
        let mut creates = self.creates.load().await?;

        let mut millis = now.timestamp_millis();
        let mut id = local_id(R::KIND, millis);
        while creates.iter().any(|create| create.id == id) {
            millis += 1;
            id = local_id(R::KIND, millis);
        }

        let pending = PendingCreate {
            id,
            payload,
            created_at: now,
            revision: 0,
        };
        creates.push(pending.clone());
        self.creates.save(&creates).await?;
        Ok(pending)
    }

    /// Merges `patch` into the existing update for `id`, or appends one.
    pub async fn enqueue_update(&self, id: &str, patch: R::Patch) -> ResultEngine<()> {
        let _guard = self.guard.lock().await;
        self.push_update(id, patch).await
    }

    /// Adds `id` to the delete set. A pending update for the same record is
    /// dropped since the record is going away.
    pub async fn enqueue_delete(&self, id: &str) -> ResultEngine<()> {
        let _guard = self.guard.lock().await;
        self.push_delete(id).await
    }

    async fn push_update(&self, id: &str, patch: R::Patch) -> ResultEngine<()> {
        let mut updates = self.updates.load().await?;
        match updates.iter_mut().find(|update| update.id == id) {
            Some(existing) => existing.data.merge(patch),
            None => updates.push(PendingUpdate {
                id: id.to_string(),
                data: patch,
            }),
        }
        self.updates.save(&updates).await
    }

    async fn push_delete(&self, id: &str) -> ResultEngine<()> {
        let mut deletes = self.deletes.load().await?;
        if !deletes.iter().any(|delete| delete.id == id) {
            deletes.push(PendingDelete { id: id.to_string() });
            self.deletes.save(&deletes).await?;
        }

        let mut updates = self.updates.load().await?;
        let before = updates.len();
        updates.retain(|update| update.id != id);
        if updates.len() != before {
            self.updates.save(&updates).await?;
        }
        Ok(())
    }

    /// Applies `patch` to the payload of a not yet synced create, in place.
    pub async fn amend_create(
        &self,
        local_id: &str,
        patch: &R::Patch,
    ) -> ResultEngine<Option<PendingCreate<R::Draft>>> {
        let _guard = self.guard.lock().await;
        let mut creates = self.creates.load().await?;
        let Some(pending) = creates.iter_mut().find(|create| create.id == local_id) else {
            return Ok(None);
        };
        patch.apply_to(&mut pending.payload);
        pending.revision += 1;
        let amended = pending.clone();
        self.creates.save(&creates).await?;
        Ok(Some(amended))
    }

    /// Drops a not yet synced create. Returns whether it was queued.
    pub async fn discard_create(&self, local_id: &str) -> ResultEngine<bool> {
        let mut discarded = self.guard.lock().await;
        let removed = prune(&self.creates, &[local_id.to_string()], |create| &create.id).await?;
        if removed > 0 {
            discarded.insert(local_id.to_string());
        }
        Ok(removed > 0)
    }

    /// Settles a replayed create the server stored as `server_id`.
    ///
    /// The entry is dropped when it still holds the payload that was sent.
    /// An entry amended during the call is turned into an update of
    /// `server_id`, one discarded during the call into a delete of it.
    pub async fn settle_create(
        &self,
        sent: &PendingCreate<R::Draft>,
        server_id: &str,
    ) -> ResultEngine<()> {
        let mut discarded = self.guard.lock().await;
        let mut creates = self.creates.load().await?;
        let Some(index) = creates.iter().position(|create| create.id == sent.id) else {
            if discarded.remove(&sent.id) {
                self.push_delete(server_id).await?;
            }
            return Ok(());
        };

        let current = creates.remove(index);
        self.creates.save(&creates).await?;
        if current.revision != sent.revision {
            self.push_update(server_id, R::patch_from_draft(&current.payload))
                .await?;
        }
        Ok(())
    }

    pub async fn creates(&self) -> ResultEngine<Vec<PendingCreate<R::Draft>>> {
        self.creates.load().await
    }

    pub async fn updates(&self) -> ResultEngine<Vec<PendingUpdate<R::Patch>>> {
        self.updates.load().await
    }

    pub async fn deletes(&self) -> ResultEngine<Vec<PendingDelete>> {
        self.deletes.load().await
    }

    pub async fn counts(&self) -> ResultEngine<QueueCounts> {
        Ok(QueueCounts {
            creates: self.creates.load().await?.len(),
            updates: self.updates.load().await?.len(),
            deletes: self.deletes.load().await?.len(),
        })
    }

    /// Removes exactly the updates in `ids`. Entries enqueued after the
    /// caller read the queue are kept, since the queue is re-read here.
    pub async fn remove_updates(&self, ids: &[String]) -> ResultEngine<usize> {
        let _guard = self.guard.lock().await;
        prune(&self.updates, ids, |update| &update.id).await
    }

    pub async fn remove_deletes(&self, ids: &[String]) -> ResultEngine<usize> {
        let _guard = self.guard.lock().await;
        prune(&self.deletes, ids, |delete| &delete.id).await
    }

    /// Empties all three queues.
    pub async fn clear(&self) -> ResultEngine<()> {
        let mut discarded = self.guard.lock().await;
        discarded.clear();
        self.creates.clear().await?;
        self.updates.clear().await?;
        self.deletes.clear().await
    }
}

async fn prune<S, T>(
    repository: &Repository<S, T>,
    ids: &[String],
    id_of: impl Fn(&T) -> &String,
) -> ResultEngine<usize>
where
    S: KeyValueStore,
    T: Serialize + serde::de::DeserializeOwned,
{
    if ids.is_empty() {
        return Ok(0);
    }
    let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut items = repository.load().await?;
    let before = items.len();
    items.retain(|item| !ids.contains(id_of(item).as_str()));
    let removed = before - items.len();
    if removed > 0 {
        repository.save(&items).await?;
    }
    Ok(removed)
}
