//! Merged view: server cache plus not yet synced local changes.

use std::collections::{HashMap, HashSet};

use api_types::{NewRecord, Record};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::queue::{PendingCreate, PendingDelete, PendingUpdate};

/// One row of the merged view.
#[derive(Clone, Debug, PartialEq)]
pub enum MergedRecord<R: Record> {
    /// Confirmed by the server, possibly with pending updates applied.
    Synced(R),
    /// Created on this device and not yet accepted by the server.
    Offline(PendingCreate<R::Draft>),
}

impl<R: Record> MergedRecord<R> {
    /// Server id, or the local id for offline records.
    pub fn id(&self) -> &str {
        match self {
            Self::Synced(record) => record.id(),
            Self::Offline(pending) => &pending.id,
        }
    }

    pub fn date(&self) -> DateTime<Utc> {
        match self {
            Self::Synced(record) => record.date(),
            Self::Offline(pending) => pending.payload.date(),
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }

    pub fn as_synced(&self) -> Option<&R> {
        match self {
            Self::Synced(record) => Some(record),
            Self::Offline(_) => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OfflineRow<'a, D> {
    id: &'a str,
    #[serde(flatten)]
    payload: &'a D,
    created_at: DateTime<Utc>,
    is_offline: bool,
}

/// Synced rows serialize as the server record, offline rows as the draft
/// fields plus `id`, `createdAt` and `isOffline: true`.
impl<R: Record> Serialize for MergedRecord<R> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        match self {
            Self::Synced(record) => record.serialize(serializer),
            Self::Offline(pending) => OfflineRow {
                id: &pending.id,
                payload: &pending.payload,
                created_at: pending.created_at,
                is_offline: true,
            }
            .serialize(serializer),
        }
    }
}

/// Builds the list the UI renders.
///
/// 1. cache records whose id is pending deletion are dropped;
/// 2. pending updates are applied over the remaining records;
/// 3. pending creates are appended as offline rows;
/// 4. everything is sorted by date, newest first (stable).
///
/// Updates never create rows. Offline creates the server already accepted
/// (their local id shows up on a cached record) are skipped so a create
/// whose response was lost does not appear twice.
pub fn build_merged_view<R: Record>(
    cache: Vec<R>,
    creates: Vec<PendingCreate<R::Draft>>,
    updates: &[PendingUpdate<R::Patch>],
    deletes: &[PendingDelete],
) -> Vec<MergedRecord<R>> {
    let deleted: HashSet<&str> = deletes.iter().map(|delete| delete.id.as_str()).collect();
    let patches: HashMap<&str, &R::Patch> = updates
        .iter()
        .map(|update| (update.id.as_str(), &update.data))
        .collect();

    let mut confirmed_local_ids: HashSet<String> = HashSet::new();
    let mut merged: Vec<MergedRecord<R>> = Vec::with_capacity(cache.len() + creates.len());
    for mut record in cache {
        if deleted.contains(record.id()) {
            continue;
        }
        if let Some(local_id) = record.local_id() {
            confirmed_local_ids.insert(local_id.to_string());
        }
        if let Some(patch) = patches.get(record.id()) {
            record.apply(patch);
        }
        merged.push(MergedRecord::Synced(record));
    }

    merged.extend(
        creates
            .into_iter()
            .filter(|create| {
                !deleted.contains(create.id.as_str()) && !confirmed_local_ids.contains(&create.id)
            })
            .map(MergedRecord::Offline),
    );

    merged.sort_by(|a, b| b.date().cmp(&a.date()));
    merged
}
