//! Sync reconciler: replays the pending queues against the server.

use std::{
    ops::AddAssign,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use api_types::{Record, expense::Expense, income::Income, recurring::RecurringTemplate};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    ResultEngine,
    queue::QueueCounts,
    remote::RemoteApi,
    service::OfflineService,
    store::KeyValueStore,
};

/// Namespace of every store key written by the engine.
pub const DEFAULT_NAMESPACE: &str = "pennywise";

/// Aggregate outcome of one sync pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub errors: usize,
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, rhs: Self) {
        self.synced += rhs.synced;
        self.errors += rhs.errors;
    }
}

/// Queue sizes of every entity type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    pub expense: QueueCounts,
    pub income: QueueCounts,
    pub recurring: QueueCounts,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.expense.total() + self.income.total() + self.recurring.total()
    }
}

/// Resets the running flag however the pass ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The three entity services sharing one store and one remote API.
#[derive(Debug)]
pub struct SyncEngine<S, A> {
    expenses: OfflineService<S, A, Expense>,
    incomes: OfflineService<S, A, Income>,
    recurring: OfflineService<S, A, RecurringTemplate>,
    running: AtomicBool,
}

impl<S: KeyValueStore, A: RemoteApi> SyncEngine<S, A> {
    /// Return a builder for `SyncEngine`.
    pub fn builder(store: Arc<S>, api: Arc<A>) -> SyncEngineBuilder<S, A> {
        SyncEngineBuilder {
            store,
            api,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn expenses(&self) -> &OfflineService<S, A, Expense> {
        &self.expenses
    }

    pub fn incomes(&self) -> &OfflineService<S, A, Income> {
        &self.incomes
    }

    pub fn recurring(&self) -> &OfflineService<S, A, RecurringTemplate> {
        &self.recurring
    }

    pub async fn pending_counts(&self) -> ResultEngine<PendingCounts> {
        Ok(PendingCounts {
            expense: self.expenses.queues().counts().await?,
            income: self.incomes.queues().counts().await?,
            recurring: self.recurring.queues().counts().await?,
        })
    }

    /// Drops every queued change of every entity type.
    pub async fn clear_pending(&self) -> ResultEngine<()> {
        self.expenses.queues().clear().await?;
        self.incomes.queues().clear().await?;
        self.recurring.queues().clear().await
    }

    /// Replays expenses, then incomes, then recurring templates.
    ///
    /// Failed items stay queued and are only counted. The returned error is
    /// reserved for the local store failing while the queues are pruned.
    /// A call made while another pass is running returns an empty report.
    pub async fn sync_pending(&self, token: &str) -> ResultEngine<SyncReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("sync already running, skipping");
            return Ok(SyncReport::default());
        }
        let _running = RunningGuard(&self.running);

        let mut report = SyncReport::default();
        report += replay(&self.expenses, token).await?;
        report += replay(&self.incomes, token).await?;
        report += replay(&self.recurring, token).await?;

        info!(synced = report.synced, errors = report.errors, "sync finished");
        Ok(report)
    }
}

/// Creates, then updates, then deletes of one entity type. Each queue is
/// read once, so entries enqueued during the pass wait for the next one.
/// A create amended or discarded while its request was in flight settles
/// into an update or a delete, which the same pass then replays.
async fn replay<S, A, R>(service: &OfflineService<S, A, R>, token: &str) -> ResultEngine<SyncReport>
where
    S: KeyValueStore,
    A: RemoteApi,
    R: Record,
{
    let queues = service.queues();
    let api = service.api();
    let mut report = SyncReport::default();

    for create in queues.creates().await? {
        match api.create::<R>(token, &create.payload, Some(&create.id)).await {
            Ok(record) => {
                debug!(kind = %R::KIND, local_id = %create.id, id = record.id(), "create synced");
                queues.settle_create(&create, record.id()).await?;
                report.synced += 1;
            }
            Err(err) => {
                warn!(kind = %R::KIND, local_id = %create.id, error = %err, "pending create failed");
                report.errors += 1;
            }
        }
    }

    let mut done = Vec::new();
    for update in queues.updates().await? {
        match api.update::<R>(token, &update.id, &update.data).await {
            Ok(_) => done.push(update.id),
            Err(err) => {
                warn!(kind = %R::KIND, id = %update.id, error = %err, "pending update failed");
                report.errors += 1;
            }
        }
    }
    report.synced += done.len();
    queues.remove_updates(&done).await?;

    let mut done = Vec::new();
    for delete in queues.deletes().await? {
        match api.delete::<R>(token, &delete.id).await {
            Ok(()) => done.push(delete.id),
            Err(err) if err.is_not_found() => {
                debug!(kind = %R::KIND, id = %delete.id, "already deleted on the server");
                done.push(delete.id);
            }
            Err(err) => {
                warn!(kind = %R::KIND, id = %delete.id, error = %err, "pending delete failed");
                report.errors += 1;
            }
        }
    }
    report.synced += done.len();
    queues.remove_deletes(&done).await?;

    Ok(report)
}

pub struct SyncEngineBuilder<S, A> {
    store: Arc<S>,
    api: Arc<A>,
    namespace: String,
}

impl<S: KeyValueStore, A: RemoteApi> SyncEngineBuilder<S, A> {
    /// Prefix of the store keys, `pennywise` by default.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Construct `SyncEngine`
    pub fn build(self) -> SyncEngine<S, A> {
        SyncEngine {
            expenses: OfflineService::new(self.store.clone(), self.api.clone(), &self.namespace),
            incomes: OfflineService::new(self.store.clone(), self.api.clone(), &self.namespace),
            recurring: OfflineService::new(self.store, self.api, &self.namespace),
            running: AtomicBool::new(false),
        }
    }
}
