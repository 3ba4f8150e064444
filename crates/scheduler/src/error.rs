use action_flow::FlowError;
use leadflow_run_store::StoreError;
use thiserror::Error;

use crate::credentials::CredentialError;

/// Reasons a run is rejected before anything is scheduled, or cannot be
/// recorded.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("platform {platform} has more than one flow in this run: {flows}")]
    DuplicatePlatform { platform: String, flows: String },

    #[error("flow {flow} needs credentials: {source}")]
    MissingCredentials {
        flow: String,
        #[source]
        source: CredentialError,
    },

    #[error("execution store error: {0}")]
    Store(#[from] StoreError),

    #[error("run task failed: {0}")]
    Internal(String),
}
