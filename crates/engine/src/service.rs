//! Offline-first mutations and reads for one entity type.
//!
//! Every mutation tries the server first. A connectivity failure turns into
//! a queued entry and a success for the caller; any other failure is
//! returned as is and nothing is queued.

use std::sync::Arc;

use api_types::{
    ListQuery, NewRecord, Patch, Record,
    recurring::{Generated, ProcessDueReport, RecurringPatch, RecurringTemplate},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::{
    EngineError, ResultEngine,
    cache::ServerCache,
    merge::{MergedRecord, build_merged_view},
    queue::{PendingCreate, PendingQueues, is_local_id},
    remote::{ApiError, RemoteApi},
    store::KeyValueStore,
};

/// Result of a read.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedView<R: Record> {
    pub records: Vec<MergedRecord<R>>,
    /// `true` when the server could not be reached and the cached snapshot
    /// was used instead.
    pub stale: bool,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Outcome of a mutation, as the caller should render it.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation<R: Record> {
    /// The server confirmed the change.
    Saved(R),
    /// The record is gone, on the server or from the local queue.
    Removed,
    /// The record lives only on this device for now.
    Offline(PendingCreate<R::Draft>),
    /// The server was unreachable; the change will be replayed on sync.
    Queued,
}

impl<R: Record> Mutation<R> {
    /// `true` when the change still has to reach the server.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Offline(_) | Self::Queued)
    }
}

#[derive(Debug)]
pub struct OfflineService<S, A, R: Record> {
    api: Arc<A>,
    queues: PendingQueues<S, R>,
    cache: ServerCache<S, R>,
}

impl<S, A, R> OfflineService<S, A, R>
where
    S: KeyValueStore,
    A: RemoteApi,
    R: Record,
{
    pub fn new(store: Arc<S>, api: Arc<A>, namespace: &str) -> Self {
        Self {
            api,
            queues: PendingQueues::new(store.clone(), namespace),
            cache: ServerCache::new(store, namespace),
        }
    }

    pub fn queues(&self) -> &PendingQueues<S, R> {
        &self.queues
    }

    pub fn cache(&self) -> &ServerCache<S, R> {
        &self.cache
    }

    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    /// Pulls the list from the server, refreshes the cache and returns the
    /// merged view. When offline, the cached snapshot (filtered by `query`)
    /// is used and the view is flagged stale.
    ///
    /// An unfiltered answer replaces the cache. A filtered one only replaces
    /// the cached records the same filter selects.
    pub async fn fetch(&self, token: &str, query: &ListQuery) -> ResultEngine<MergedView<R>> {
        match self.api.list::<R>(token, query).await {
            Ok(records) => {
                if *query == ListQuery::default() {
                    self.cache.replace(&records).await?;
                } else {
                    let mut cached: Vec<R> = self
                        .cache
                        .load()
                        .await?
                        .into_iter()
                        .filter(|cached| {
                            !query.matches(cached)
                                && records.iter().all(|fresh| fresh.id() != cached.id())
                        })
                        .collect();
                    cached.extend(records.iter().cloned());
                    self.cache.replace(&cached).await?;
                }
                self.view(records, false).await
            }
            Err(err) if err.is_connectivity() => {
                info!(kind = %R::KIND, error = %err, "server unreachable, using cached records");
                let records = self
                    .cache
                    .load()
                    .await?
                    .into_iter()
                    .filter(|record| query.matches(record))
                    .collect();
                self.view(records, true).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The merged view over the cached snapshot, without touching the
    /// network.
    pub async fn cached_view(&self) -> ResultEngine<MergedView<R>> {
        let records = self.cache.load().await?;
        self.view(records, true).await
    }

    async fn view(&self, cache: Vec<R>, stale: bool) -> ResultEngine<MergedView<R>> {
        let records = build_merged_view(
            cache,
            self.queues.creates().await?,
            &self.queues.updates().await?,
            &self.queues.deletes().await?,
        );
        Ok(MergedView {
            records,
            stale,
            refreshed_at: self.cache.refreshed_at().await?,
        })
    }

    pub async fn create(&self, token: &str, draft: R::Draft) -> ResultEngine<Mutation<R>> {
        draft.validate().map_err(ApiError::Validation)?;
        match self.api.create::<R>(token, &draft, None).await {
            Ok(record) => Ok(Mutation::Saved(record)),
            Err(err) if err.is_connectivity() => {
                let pending = self.queues.enqueue_create(draft).await?;
                info!(kind = %R::KIND, id = %pending.id, "create queued for later sync");
                Ok(Mutation::Offline(pending))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Updates a server record, or amends the pending create when `id` is a
    /// local id.
    pub async fn update(&self, token: &str, id: &str, patch: R::Patch) -> ResultEngine<Mutation<R>> {
        if patch.is_empty() {
            return Err(ApiError::Validation("nothing to update".to_string()).into());
        }
        patch.validate().map_err(ApiError::Validation)?;
        if is_local_id(id)
            && let Some(pending) = self.queues.amend_create(id, &patch).await?
        {
            return Ok(Mutation::Offline(pending));
        }
        let target = self.resolve(id).await?;

        match self.api.update::<R>(token, &target, &patch).await {
            Ok(record) => Ok(Mutation::Saved(record)),
            Err(err) if err.is_connectivity() => {
                self.queues.enqueue_update(&target, patch).await?;
                info!(kind = %R::KIND, id = %target, "update queued for later sync");
                Ok(Mutation::Queued)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes a server record, or drops the pending create when `id` is a
    /// local id. A record the server no longer knows counts as deleted.
    pub async fn delete(&self, token: &str, id: &str) -> ResultEngine<Mutation<R>> {
        if is_local_id(id) && self.queues.discard_create(id).await? {
            return Ok(Mutation::Removed);
        }
        let target = self.resolve(id).await?;

        match self.api.delete::<R>(token, &target).await {
            Ok(()) => Ok(Mutation::Removed),
            Err(err) if err.is_not_found() => Ok(Mutation::Removed),
            Err(err) if err.is_connectivity() => {
                self.queues.enqueue_delete(&target).await?;
                info!(kind = %R::KIND, id = %target, "delete queued for later sync");
                Ok(Mutation::Queued)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Maps a local id whose create already reached the server to the
    /// server id. Server ids are returned unchanged.
    async fn resolve(&self, id: &str) -> ResultEngine<String> {
        if !is_local_id(id) {
            return Ok(id.to_string());
        }
        self.cache
            .load()
            .await?
            .into_iter()
            .find(|record| record.local_id() == Some(id))
            .map(|record| record.id().to_string())
            .ok_or_else(|| EngineError::UnknownRecord(id.to_string()))
    }
}

impl<S, A> OfflineService<S, A, RecurringTemplate>
where
    S: KeyValueStore,
    A: RemoteApi,
{
    /// Flips `active` on a template, as it currently appears in the merged
    /// view. Offline it is queued like any other update.
    pub async fn toggle(&self, token: &str, id: &str) -> ResultEngine<Mutation<RecurringTemplate>> {
        let view = self.cached_view().await?;
        let active = view
            .records
            .iter()
            .find_map(|row| match row {
                MergedRecord::Synced(template)
                    if template.id == id || template.local_id.as_deref() == Some(id) =>
                {
                    Some(template.active)
                }
                MergedRecord::Offline(pending) if pending.id == id => Some(pending.payload.active),
                _ => None,
            })
            .ok_or_else(|| EngineError::UnknownRecord(id.to_string()))?;

        let patch = RecurringPatch {
            active: Some(!active),
            ..Default::default()
        };
        self.update(token, id, patch).await
    }

    /// Generates the transaction of the template's current occurrence.
    /// Needs the server: never queued.
    pub async fn generate(&self, token: &str, id: &str) -> ResultEngine<Generated> {
        if is_local_id(id) {
            let target = self
                .resolve(id)
                .await
                .map_err(|_| EngineError::NotSynced(id.to_string()))?;
            return Ok(self.api.generate(token, &target).await?);
        }
        Ok(self.api.generate(token, id).await?)
    }

    /// Generates every due occurrence of every active template. Needs the
    /// server: never queued.
    pub async fn process_due(&self, token: &str) -> ResultEngine<ProcessDueReport> {
        Ok(self.api.process_due(token).await?)
    }
}
