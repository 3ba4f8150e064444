//! LeadFlow
//!
//! Drives many leads through declarative form flows with a bounded worker
//! pool. The engine lives in the workspace crates; this crate adds
//! configuration loading, flow documents on disk and lead files.

pub mod config;
pub mod flows;
pub mod leads;

pub use action_flow::{Flow, FlowSource};
pub use config::{EngineConfig, LoadedConfig, LogConfig, LogFormat};
pub use flows::FileFlowSource;
pub use leads::{load_leads, Lead, LeadError};
pub use leadflow_scheduler::{ProgressEvent, RunSummary, Scheduler};
