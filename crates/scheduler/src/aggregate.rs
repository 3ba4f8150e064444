//! Run-level counters and final status

use std::sync::Arc;

use chrono::Utc;
use leadflow_core_types::{ExecutionRun, ItemStatus, RunCounts, RunStatus};
use leadflow_run_store::{ExecutionStore, StoreError};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Move one item from `pending` to its terminal counter.
///
/// Non-terminal statuses leave the counts untouched and return `false`.
pub fn apply_terminal(counts: &mut RunCounts, status: ItemStatus) -> bool {
    let slot = match status {
        ItemStatus::Success => &mut counts.success,
        ItemStatus::Error => &mut counts.error,
        ItemStatus::Cancelled => &mut counts.cancelled,
        ItemStatus::Pending | ItemStatus::Running => return false,
    };
    if counts.pending == 0 {
        return false;
    }
    *slot += 1;
    counts.pending -= 1;
    true
}

/// Status a run ends with.
///
/// A requested stop wins. Otherwise the run failed only when something
/// errored and nothing succeeded; a partial success still completes.
pub fn final_status(counts: &RunCounts, stopped: bool) -> RunStatus {
    if stopped {
        RunStatus::Stopped
    } else if counts.error > 0 && counts.success == 0 {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    }
}

/// Serializes counter updates for one run and mirrors them to the store.
pub struct RunAggregator {
    run: Mutex<ExecutionRun>,
    store: Arc<dyn ExecutionStore>,
}

impl RunAggregator {
    pub fn new(run: ExecutionRun, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            run: Mutex::new(run),
            store,
        }
    }

    pub async fn counts(&self) -> RunCounts {
        self.run.lock().await.counts
    }

    pub async fn on_item_terminal(&self, status: ItemStatus) -> Result<RunCounts, StoreError> {
        let mut run = self.run.lock().await;
        if !apply_terminal(&mut run.counts, status) {
            warn!(run_id = %run.id, status = %status, "Ignoring non-terminal or surplus item update");
            return Ok(run.counts);
        }
        debug_assert!(run.counts.is_consistent());
        self.store.update_run(run.clone()).await?;
        Ok(run.counts)
    }

    pub async fn finalize(&self, stopped: bool) -> Result<ExecutionRun, StoreError> {
        let mut run = self.run.lock().await;
        if run.status.is_terminal() {
            return Ok(run.clone());
        }
        let finished = Utc::now();
        run.status = final_status(&run.counts, stopped);
        run.finished_at = Some(finished);
        run.duration_ms = Some(
            finished
                .signed_duration_since(run.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.store.update_run(run.clone()).await?;
        info!(
            run_id = %run.id,
            status = %run.status,
            success = run.counts.success,
            error = run.counts.error,
            cancelled = run.counts.cancelled,
            duration_ms = run.duration_ms.unwrap_or(0),
            "Run finished"
        );
        Ok(run.clone())
    }
}
