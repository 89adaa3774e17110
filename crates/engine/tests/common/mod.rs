#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use api_types::{
    EntityKind, ListQuery, Record,
    recurring::{Generated, ProcessDueReport},
};
use chrono::Utc;
use engine::{ApiError, MemoryStore, RemoteApi, SyncEngine};
use serde_json::Value;

#[derive(Default)]
struct State {
    offline: bool,
    lose_responses: bool,
    rejected_amounts: HashSet<i64>,
    records: HashMap<EntityKind, Vec<Value>>,
    next_id: u64,
    create_calls: usize,
}

/// In-memory server honouring the remote contract: `localId` dedup on
/// create, `NotFound` for unknown ids.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
    gate: tokio::sync::Mutex<()>,
    started: tokio::sync::Notify,
}

impl FakeApi {
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Creates are applied on the server but the caller sees a network error.
    pub fn set_lose_responses(&self, lose: bool) {
        self.state.lock().unwrap().lose_responses = lose;
    }

    pub fn reject_amount(&self, amount_minor: i64) {
        self.state.lock().unwrap().rejected_amounts.insert(amount_minor);
    }

    pub fn stored<R: Record>(&self) -> Vec<R> {
        let state = self.state.lock().unwrap();
        state
            .records
            .get(&R::KIND)
            .map(|values| {
                values
                    .iter()
                    .map(|value| serde_json::from_value(value.clone()).unwrap())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Creates wait until the returned guard is dropped.
    pub async fn hold_creates(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Resolves once a create request has reached the server.
    pub async fn create_started(&self) {
        self.started.notified().await;
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    fn check_online(state: &State) -> Result<(), ApiError> {
        if state.offline {
            return Err(ApiError::Connectivity("Network request failed".to_string()));
        }
        Ok(())
    }
}

impl RemoteApi for FakeApi {
    async fn list<R: Record>(&self, _token: &str, query: &ListQuery) -> Result<Vec<R>, ApiError> {
        Self::check_online(&self.state.lock().unwrap())?;
        Ok(self
            .stored::<R>()
            .into_iter()
            .filter(|record| query.matches(record))
            .collect())
    }

    async fn create<R: Record>(
        &self,
        _token: &str,
        draft: &R::Draft,
        local_id: Option<&str>,
    ) -> Result<R, ApiError> {
        self.started.notify_one();
        let _gate = self.gate.lock().await;
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state.create_calls += 1;

        let amount = serde_json::to_value(draft).unwrap()["amountMinor"].as_i64();
        if amount.is_some_and(|amount| state.rejected_amounts.contains(&amount)) {
            return Err(ApiError::Validation("amount rejected".to_string()));
        }

        let existing = local_id.and_then(|local_id| {
            state.records.get(&R::KIND).and_then(|values| {
                values
                    .iter()
                    .find(|value| value["localId"] == local_id)
                    .cloned()
            })
        });
        let value = match existing {
            Some(value) => value,
            None => {
                state.next_id += 1;
                let record = R::from_draft(
                    format!("srv-{}", state.next_id),
                    draft.clone(),
                    local_id.map(str::to_string),
                    Utc::now(),
                );
                let value = serde_json::to_value(&record).unwrap();
                state.records.entry(R::KIND).or_default().push(value.clone());
                value
            }
        };

        if state.lose_responses {
            return Err(ApiError::Connectivity("Failed to fetch".to_string()));
        }
        Ok(serde_json::from_value(value).unwrap())
    }

    async fn update<R: Record>(
        &self,
        _token: &str,
        id: &str,
        patch: &R::Patch,
    ) -> Result<R, ApiError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let slot = state
            .records
            .entry(R::KIND)
            .or_default()
            .iter_mut()
            .find(|value| value["_id"] == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;

        let mut record: R = serde_json::from_value(slot.clone()).unwrap();
        record.apply(patch);
        *slot = serde_json::to_value(&record).unwrap();
        Ok(record)
    }

    async fn delete<R: Record>(&self, _token: &str, id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let values = state.records.entry(R::KIND).or_default();
        let before = values.len();
        values.retain(|value| value["_id"] != id);
        if values.len() == before {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn generate(&self, _token: &str, id: &str) -> Result<Generated, ApiError> {
        Err(ApiError::Server(format!("generate {id} not supported")))
    }

    async fn process_due(&self, _token: &str) -> Result<ProcessDueReport, ApiError> {
        Err(ApiError::Server("process-due not supported".to_string()))
    }
}

pub const TOKEN: &str = "device-token";

pub fn engine() -> (SyncEngine<MemoryStore, FakeApi>, Arc<FakeApi>) {
    let api = Arc::new(FakeApi::default());
    let engine = SyncEngine::builder(Arc::new(MemoryStore::new()), api.clone()).build();
    (engine, api)
}
