//! Flow Orchestration Layer
//!
//! A [`Flow`] is an immutable, ordered list of declarative steps for one
//! platform. This crate evaluates step guards, resolves the values to type or
//! select from lead data, tracks the current frame and interprets a flow
//! against a [`action_primitives::Driver`], producing one log entry per step.

pub mod condition;
pub mod context;
pub mod errors;
pub mod executor;
pub mod resolve;
pub mod source;
pub mod types;
pub mod validate;

pub use condition::evaluate;
pub use context::FrameStack;
pub use errors::FlowError;
pub use executor::{
    FlowInterpreter, FlowOutcome, FlowRun, InterpreterSettings, NoopObserver, StepObserver,
    StepStamp,
};
pub use resolve::{resolve, resolve_and_map, Resolved, ResolutionScope};
pub use source::{FlowSource, InMemoryFlowSource};
pub use types::{Flow, Step, StepAction, ValueMap, ValueSpec, WhenCondition};
pub use validate::{references_credentials, validate_flow};
