use leadflow_core_types::{ExecutionRun, FlowKey, ItemId, RunCounts, RunId, RunStatus};
use serde::Serialize;

/// Final numbers for a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub duration_ms: u64,
}

impl From<&ExecutionRun> for RunSummary {
    fn from(run: &ExecutionRun) -> Self {
        Self {
            run_id: run.id.clone(),
            status: run.status,
            counts: run.counts,
            duration_ms: run.duration_ms.unwrap_or(0),
        }
    }
}

/// Progress stream of a run. Events for one item arrive in lifecycle order;
/// events of different items interleave.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Queued {
        item_id: ItemId,
        lead_id: String,
        flow: FlowKey,
    },
    Started {
        item_id: ItemId,
        attempt: u32,
    },
    /// Step `step` of `total` (1-based) is about to run
    Progress {
        item_id: ItemId,
        step: usize,
        total: usize,
    },
    Retrying {
        item_id: ItemId,
        attempt: u32,
        error: String,
    },
    Succeeded {
        item_id: ItemId,
    },
    Failed {
        item_id: ItemId,
        error: String,
    },
    Cancelled {
        item_id: ItemId,
    },
    Done {
        summary: RunSummary,
    },
    Stopped {
        summary: RunSummary,
    },
}

impl ProgressEvent {
    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            ProgressEvent::Queued { item_id, .. }
            | ProgressEvent::Started { item_id, .. }
            | ProgressEvent::Progress { item_id, .. }
            | ProgressEvent::Retrying { item_id, .. }
            | ProgressEvent::Succeeded { item_id }
            | ProgressEvent::Failed { item_id, .. }
            | ProgressEvent::Cancelled { item_id } => Some(item_id),
            ProgressEvent::Done { .. } | ProgressEvent::Stopped { .. } => None,
        }
    }

    /// Whether this is the last event the item will produce.
    pub fn is_item_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Succeeded { .. }
                | ProgressEvent::Failed { .. }
                | ProgressEvent::Cancelled { .. }
        )
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            ProgressEvent::Done { summary } | ProgressEvent::Stopped { summary } => Some(summary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Queued { .. } => "queued",
            ProgressEvent::Started { .. } => "started",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Retrying { .. } => "retrying",
            ProgressEvent::Succeeded { .. } => "succeeded",
            ProgressEvent::Failed { .. } => "failed",
            ProgressEvent::Cancelled { .. } => "cancelled",
            ProgressEvent::Done { .. } => "done",
            ProgressEvent::Stopped { .. } => "stopped",
        }
    }
}
