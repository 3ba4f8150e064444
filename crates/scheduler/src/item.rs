//! Item lifecycle
//!
//! ```text
//! pending ──claim──▶ running ──succeed──▶ success
//!    │                 │ ▲
//!    │                 │ └──claim (retry granted)──┐
//!    │                 ├──fail──▶ error ────────────┘
//!    │                 │
//!    └────cancel───────┴──cancel──▶ cancelled
//! ```
//!
//! `error` is terminal unless the last `fail` granted a retry. Every claim
//! opens a new [`ExecutionAttempt`]; it is closed by the transition that ends
//! the attempt and never touched again.

use chrono::Utc;
use leadflow_core_types::{ExecutionAttempt, ExecutionItem, ItemId, ItemStatus};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("item {item} cannot {action} while {status}")]
pub struct ItemTransitionError {
    pub item: ItemId,
    pub status: ItemStatus,
    pub action: &'static str,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailDecision {
    Retry { next_attempt: u32 },
    Terminal,
}

#[derive(Debug)]
pub struct ItemStateMachine {
    item: ExecutionItem,
    max_attempts: u32,
    current: Option<ExecutionAttempt>,
    retry_granted: bool,
}

impl ItemStateMachine {
    pub fn new(item: ExecutionItem, max_attempts: u32) -> Self {
        Self {
            item,
            max_attempts: max_attempts.max(1),
            current: None,
            retry_granted: false,
        }
    }

    pub fn item(&self) -> &ExecutionItem {
        &self.item
    }

    pub fn status(&self) -> ItemStatus {
        self.item.status
    }

    pub fn attempt(&self) -> u32 {
        self.item.attempt
    }

    pub fn is_terminal(&self) -> bool {
        match self.item.status {
            ItemStatus::Success | ItemStatus::Cancelled => true,
            ItemStatus::Error => !self.retry_granted,
            ItemStatus::Pending | ItemStatus::Running => false,
        }
    }

    /// Start a new attempt. Returns the opened attempt record.
    pub fn claim(&mut self) -> Result<ExecutionAttempt, ItemTransitionError> {
        match self.item.status {
            ItemStatus::Pending => {}
            ItemStatus::Error if self.retry_granted => {}
            _ => return Err(self.illegal("claim")),
        }
        self.retry_granted = false;
        self.item.attempt += 1;
        self.item.status = ItemStatus::Running;
        self.item.current_step = 0;
        self.item.error = None;
        self.touch();

        let attempt = ExecutionAttempt::begin(self.item.id.clone(), self.item.attempt);
        self.current = Some(attempt.clone());
        Ok(attempt)
    }

    /// Record progress; clamped to the flow length.
    pub fn advance(&mut self, step: usize) -> usize {
        self.item.current_step = step.min(self.item.total_steps);
        self.touch();
        self.item.current_step
    }

    pub fn succeed(&mut self) -> Result<ExecutionAttempt, ItemTransitionError> {
        self.require_running("succeed")?;
        self.item.status = ItemStatus::Success;
        self.item.current_step = self.item.total_steps;
        self.touch();
        self.close(ItemStatus::Success, None)
    }

    /// End the attempt in error. A retry is granted only when
    /// `retry_allowed` and the attempt budget is not spent.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        retry_allowed: bool,
    ) -> Result<(FailDecision, ExecutionAttempt), ItemTransitionError> {
        self.require_running("fail")?;
        let message = message.into();
        self.item.status = ItemStatus::Error;
        self.item.error = Some(message.clone());
        self.touch();
        let attempt = self.close(ItemStatus::Error, Some(message))?;

        let decision = if retry_allowed && self.item.attempt < self.max_attempts {
            self.retry_granted = true;
            FailDecision::Retry {
                next_attempt: self.item.attempt + 1,
            }
        } else {
            FailDecision::Terminal
        };
        Ok((decision, attempt))
    }

    /// Withdraw a granted retry, leaving the item terminally in error.
    pub fn give_up(&mut self) -> Result<(), ItemTransitionError> {
        if self.item.status != ItemStatus::Error || !self.retry_granted {
            return Err(self.illegal("give up"));
        }
        self.retry_granted = false;
        self.touch();
        Ok(())
    }

    /// Cancel a pending or running item. Returns the closed attempt when one
    /// was open.
    pub fn cancel(&mut self) -> Result<Option<ExecutionAttempt>, ItemTransitionError> {
        match self.item.status {
            ItemStatus::Pending => {
                self.item.status = ItemStatus::Cancelled;
                self.item.error = Some("cancelled".to_string());
                self.touch();
                Ok(None)
            }
            ItemStatus::Running => {
                self.item.status = ItemStatus::Cancelled;
                self.item.error = Some("cancelled".to_string());
                self.touch();
                self.close(ItemStatus::Cancelled, Some("cancelled".to_string()))
                    .map(Some)
            }
            _ => Err(self.illegal("cancel")),
        }
    }

    fn require_running(&self, action: &'static str) -> Result<(), ItemTransitionError> {
        if self.item.status == ItemStatus::Running {
            Ok(())
        } else {
            Err(self.illegal(action))
        }
    }

    fn close(
        &mut self,
        status: ItemStatus,
        error: Option<String>,
    ) -> Result<ExecutionAttempt, ItemTransitionError> {
        let mut attempt = self.current.take().ok_or_else(|| self.illegal("close attempt"))?;
        attempt.status = status;
        attempt.error = error;
        attempt.finished_at = Some(Utc::now());
        Ok(attempt)
    }

    fn touch(&mut self) {
        self.item.updated_at = Utc::now();
    }

    fn illegal(&self, action: &'static str) -> ItemTransitionError {
        ItemTransitionError {
            item: self.item.id.clone(),
            status: self.item.status,
            action,
        }
    }
}
