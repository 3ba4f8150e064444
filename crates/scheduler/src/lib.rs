//! Batch scheduler for lead automation runs
//!
//! [`Scheduler::run_all`] validates a batch, persists one item per
//! lead/flow pair and starts `concurrency` workers that claim pending items
//! and drive them through [`item::ItemStateMachine`]. Progress is reported on
//! an unbounded channel; [`Scheduler::cancel`] stops a run cooperatively.

pub mod aggregate;
pub mod credentials;
pub mod error;
pub mod events;
pub mod item;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod runtime;

pub use aggregate::RunAggregator;
pub use credentials::{
    CredentialError, CredentialProvider, EnvCredentialProvider, StaticCredentialProvider,
};
pub use error::SchedulerError;
pub use events::{ProgressEvent, RunSummary};
pub use item::{FailDecision, ItemStateMachine, ItemTransitionError};
pub use metrics::SchedulerMetricsSnapshot;
pub use model::{RetryOpt, RunItem, RunRequest, SchedulerConfig, StopPolicy};
pub use orchestrator::{RunCompletion, RunHandle, Scheduler};
