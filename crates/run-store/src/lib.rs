use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use leadflow_core_types::{
    ExecutionAttempt, ExecutionItem, ExecutionRun, ItemId, ItemStatus, RunId, StepLogEntry,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::to_writer_pretty;
use thiserror::Error;

/// Failures reported by an [`ExecutionStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    #[error("attempt {attempt} of item {item} not found")]
    AttemptNotFound { item: ItemId, attempt: u32 },

    #[error("attempt {attempt} of item {item} is closed")]
    AttemptClosed { item: ItemId, attempt: u32 },

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Persistence for runs, items, attempts and step logs.
///
/// Writers are serialized per record; the scheduler never relies on
/// cross-record transactions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_run(&self, run: ExecutionRun) -> Result<(), StoreError>;
    async fn update_run(&self, run: ExecutionRun) -> Result<(), StoreError>;
    async fn get_run(&self, id: &RunId) -> Result<ExecutionRun, StoreError>;

    async fn create_item(&self, item: ExecutionItem) -> Result<(), StoreError>;
    async fn update_item(&self, item: ExecutionItem) -> Result<(), StoreError>;
    async fn get_item(&self, id: &ItemId) -> Result<ExecutionItem, StoreError>;
    /// Items of a run in creation order.
    async fn list_items(&self, run: &RunId) -> Result<Vec<ExecutionItem>, StoreError>;
    async fn items_by_status(
        &self,
        run: &RunId,
        status: ItemStatus,
    ) -> Result<Vec<ExecutionItem>, StoreError>;

    async fn create_attempt(&self, attempt: ExecutionAttempt) -> Result<(), StoreError>;
    /// Replace an open attempt. Closed attempts are immutable.
    async fn update_attempt(&self, attempt: ExecutionAttempt) -> Result<(), StoreError>;
    async fn list_attempts(&self, item: &ItemId) -> Result<Vec<ExecutionAttempt>, StoreError>;

    async fn append_step(&self, entry: StepLogEntry) -> Result<(), StoreError>;
    async fn list_steps(&self, item: &ItemId) -> Result<Vec<StepLogEntry>, StoreError>;
}

/// Write counters kept by [`InMemoryExecutionStore`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreStats {
    pub runs: u64,
    pub items: u64,
    pub item_updates: u64,
    pub attempts: u64,
    pub step_entries: u64,
}

/// Reference store keeping everything in process memory.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    runs: DashMap<RunId, ExecutionRun>,
    items: DashMap<ItemId, ExecutionItem>,
    run_items: DashMap<RunId, Mutex<Vec<ItemId>>>,
    attempts: DashMap<ItemId, Mutex<Vec<ExecutionAttempt>>>,
    steps: DashMap<ItemId, Mutex<Vec<StepLogEntry>>>,
    stats: Mutex<StoreStats>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.lock().clone()
    }

    fn item_ids(&self, run: &RunId) -> Vec<ItemId> {
        self.run_items
            .get(run)
            .map(|entry| entry.value().lock().clone())
            .unwrap_or_default()
    }

    fn items_of(&self, run: &RunId) -> Vec<ExecutionItem> {
        self.item_ids(run)
            .iter()
            .filter_map(|id| self.items.get(id).map(|item| item.value().clone()))
            .collect()
    }

    /// Snapshot of one run with its items, attempts and step logs.
    pub fn run_snapshot(&self, run: &RunId) -> Result<RunSnapshot, StoreError> {
        let record = self
            .runs
            .get(run)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::RunNotFound(run.clone()))?;
        let items = self
            .items_of(run)
            .into_iter()
            .map(|item| {
                let attempts = self
                    .attempts
                    .get(&item.id)
                    .map(|entry| entry.value().lock().clone())
                    .unwrap_or_default();
                let steps = self
                    .steps
                    .get(&item.id)
                    .map(|entry| entry.value().lock().clone())
                    .unwrap_or_default();
                ItemSnapshot {
                    item,
                    attempts,
                    steps,
                }
            })
            .collect();
        Ok(RunSnapshot { run: record, items })
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut runs: Vec<RunSnapshot> = self
            .runs
            .iter()
            .filter_map(|entry| self.run_snapshot(entry.key()).ok())
            .collect();
        runs.sort_by(|a, b| a.run.started_at.cmp(&b.run.started_at));
        let snapshot = StoreSnapshot {
            stats: self.stats(),
            runs,
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_run(&self, run: ExecutionRun) -> Result<(), StoreError> {
        if self.runs.contains_key(&run.id) {
            return Err(StoreError::Duplicate {
                kind: "run",
                id: run.id.to_string(),
            });
        }
        self.run_items
            .insert(run.id.clone(), Mutex::new(Vec::new()));
        self.runs.insert(run.id.clone(), run);
        self.stats.lock().runs += 1;
        Ok(())
    }

    async fn update_run(&self, run: ExecutionRun) -> Result<(), StoreError> {
        let mut entry = self
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| StoreError::RunNotFound(run.id.clone()))?;
        *entry.value_mut() = run;
        Ok(())
    }

    async fn get_run(&self, id: &RunId) -> Result<ExecutionRun, StoreError> {
        self.runs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::RunNotFound(id.clone()))
    }

    async fn create_item(&self, item: ExecutionItem) -> Result<(), StoreError> {
        if self.items.contains_key(&item.id) {
            return Err(StoreError::Duplicate {
                kind: "item",
                id: item.id.to_string(),
            });
        }
        {
            let order = self
                .run_items
                .get(&item.run_id)
                .ok_or_else(|| StoreError::RunNotFound(item.run_id.clone()))?;
            order.value().lock().push(item.id.clone());
        }
        self.items.insert(item.id.clone(), item);
        self.stats.lock().items += 1;
        Ok(())
    }

    async fn update_item(&self, item: ExecutionItem) -> Result<(), StoreError> {
        let mut entry = self
            .items
            .get_mut(&item.id)
            .ok_or_else(|| StoreError::ItemNotFound(item.id.clone()))?;
        *entry.value_mut() = item;
        self.stats.lock().item_updates += 1;
        Ok(())
    }

    async fn get_item(&self, id: &ItemId) -> Result<ExecutionItem, StoreError> {
        self.items
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::ItemNotFound(id.clone()))
    }

    async fn list_items(&self, run: &RunId) -> Result<Vec<ExecutionItem>, StoreError> {
        if !self.runs.contains_key(run) {
            return Err(StoreError::RunNotFound(run.clone()));
        }
        Ok(self.items_of(run))
    }

    async fn items_by_status(
        &self,
        run: &RunId,
        status: ItemStatus,
    ) -> Result<Vec<ExecutionItem>, StoreError> {
        Ok(self
            .list_items(run)
            .await?
            .into_iter()
            .filter(|item| item.status == status)
            .collect())
    }

    async fn create_attempt(&self, attempt: ExecutionAttempt) -> Result<(), StoreError> {
        if !self.items.contains_key(&attempt.item_id) {
            return Err(StoreError::ItemNotFound(attempt.item_id.clone()));
        }
        let entry = self
            .attempts
            .entry(attempt.item_id.clone())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut attempts = entry.value().lock();
        if attempts.iter().any(|a| a.attempt >= attempt.attempt) {
            return Err(StoreError::Duplicate {
                kind: "attempt",
                id: format!("{}#{}", attempt.item_id, attempt.attempt),
            });
        }
        attempts.push(attempt);
        self.stats.lock().attempts += 1;
        Ok(())
    }

    async fn update_attempt(&self, attempt: ExecutionAttempt) -> Result<(), StoreError> {
        let not_found = || StoreError::AttemptNotFound {
            item: attempt.item_id.clone(),
            attempt: attempt.attempt,
        };
        let entry = self.attempts.get(&attempt.item_id).ok_or_else(not_found)?;
        let mut attempts = entry.value().lock();
        let slot = attempts
            .iter_mut()
            .find(|a| a.attempt == attempt.attempt)
            .ok_or_else(not_found)?;
        if slot.is_closed() {
            return Err(StoreError::AttemptClosed {
                item: attempt.item_id.clone(),
                attempt: attempt.attempt,
            });
        }
        *slot = attempt;
        Ok(())
    }

    async fn list_attempts(&self, item: &ItemId) -> Result<Vec<ExecutionAttempt>, StoreError> {
        if !self.items.contains_key(item) {
            return Err(StoreError::ItemNotFound(item.clone()));
        }
        Ok(self
            .attempts
            .get(item)
            .map(|entry| entry.value().lock().clone())
            .unwrap_or_default())
    }

    async fn append_step(&self, entry: StepLogEntry) -> Result<(), StoreError> {
        let item = entry
            .item_id
            .clone()
            .ok_or_else(|| StoreError::Backend("step entry without item id".to_string()))?;
        if !self.items.contains_key(&item) {
            return Err(StoreError::ItemNotFound(item));
        }
        self.steps
            .entry(item)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .value()
            .lock()
            .push(entry);
        self.stats.lock().step_entries += 1;
        Ok(())
    }

    async fn list_steps(&self, item: &ItemId) -> Result<Vec<StepLogEntry>, StoreError> {
        if !self.items.contains_key(item) {
            return Err(StoreError::ItemNotFound(item.clone()));
        }
        Ok(self
            .steps
            .get(item)
            .map(|entry| entry.value().lock().clone())
            .unwrap_or_default())
    }
}

/// One item with its attempts and step log.
#[derive(Clone, Debug, Serialize)]
pub struct ItemSnapshot {
    #[serde(flatten)]
    pub item: ExecutionItem,
    pub attempts: Vec<ExecutionAttempt>,
    pub steps: Vec<StepLogEntry>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSnapshot {
    pub run: ExecutionRun,
    pub items: Vec<ItemSnapshot>,
}

#[derive(Serialize)]
struct StoreSnapshot {
    stats: StoreStats,
    runs: Vec<RunSnapshot>,
}
