//! Execution records persisted by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{FlowKey, ItemId, ItemStatus, RunId, RunStatus};

/// Placeholder written instead of secret values.
pub const REDACTED: &str = "********";

/// Item tallies for a run.
///
/// `pending` counts every item that has not reached a terminal state yet,
/// including the ones currently running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: u32,
    pub success: u32,
    pub error: u32,
    pub pending: u32,
    pub cancelled: u32,
}

impl RunCounts {
    pub fn with_total(total: u32) -> Self {
        Self {
            total,
            pending: total,
            ..Self::default()
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.success + self.error + self.cancelled + self.pending == self.total
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: RunId,
    pub status: RunStatus,
    pub concurrency: usize,
    pub counts: RunCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Scheduler settings in effect when the run started.
    pub settings: Value,
}

impl ExecutionRun {
    pub fn start(id: RunId, concurrency: usize, total: u32, settings: Value) -> Self {
        Self {
            id,
            status: RunStatus::Running,
            concurrency,
            counts: RunCounts::with_total(total),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            settings,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionItem {
    pub id: ItemId,
    pub run_id: RunId,
    pub lead_id: String,
    pub flow: FlowKey,
    pub status: ItemStatus,
    pub current_step: usize,
    pub total_steps: usize,
    /// Number of the latest attempt; zero until the item is first claimed.
    pub attempt: u32,
    pub error: Option<String>,
    pub artifact_dir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionItem {
    pub fn pending(run_id: RunId, lead_id: impl Into<String>, flow: FlowKey, total_steps: usize) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            run_id,
            lead_id: lead_id.into(),
            flow,
            status: ItemStatus::Pending,
            current_step: 0,
            total_steps,
            attempt: 0,
            error: None,
            artifact_dir: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn platform(&self) -> &str {
        &self.flow.platform
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub item_id: ItemId,
    pub attempt: u32,
    pub status: ItemStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionAttempt {
    pub fn begin(item_id: ItemId, attempt: u32) -> Self {
        Self {
            item_id,
            attempt,
            status: ItemStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// How a single step ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepOutcome {
    Ok,
    /// Guard evaluated to false; the driver was not contacted.
    Skipped,
    Failed,
    /// Failed on an optional step; the flow continued.
    FailedOptional,
}

impl StepOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            StepOutcome::Ok => "ok",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "failed",
            StepOutcome::FailedOptional => "failedOptional",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub run_id: Option<RunId>,
    pub item_id: Option<ItemId>,
    pub attempt: u32,
    pub step_index: usize,
    pub step_type: String,
    pub label: Option<String>,
    pub action: String,
    pub selector: Option<String>,
    pub field: Option<String>,
    pub raw_value: Option<Value>,
    pub mapped_value: Option<Value>,
    pub outcome: StepOutcome,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub artifact: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StepLogEntry {
    pub fn new(step_index: usize, step_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            run_id: None,
            item_id: None,
            attempt: 0,
            step_index,
            step_type: step_type.into(),
            label: None,
            action: action.into(),
            selector: None,
            field: None,
            raw_value: None,
            mapped_value: None,
            outcome: StepOutcome::Ok,
            success: true,
            duration_ms: 0,
            error: None,
            artifact: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == StepOutcome::Skipped
    }
}
