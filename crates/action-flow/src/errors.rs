//! Flow definition error types

use leadflow_core_types::FlowKey;
use thiserror::Error;

/// Errors raised while loading or validating flows.
///
/// Step failures during execution are not errors at this level; they are
/// reported through [`crate::FlowOutcome`].
#[derive(Debug, Error)]
pub enum FlowError {
    /// Flow validation failed
    #[error("Flow {flow} is invalid: {reason}")]
    ValidationFailed { flow: String, reason: String },

    /// A single step is malformed
    #[error("Flow {flow} step {index} is invalid: {reason}")]
    InvalidStep {
        flow: String,
        index: usize,
        reason: String,
    },

    /// No flow registered under this key
    #[error("Flow {0} not found")]
    NotFound(FlowKey),

    /// The flow document could not be read or parsed
    #[error("Failed to load flow {flow}: {reason}")]
    Source { flow: String, reason: String },
}
