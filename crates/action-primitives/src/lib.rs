//! Driver contract for form automation
//!
//! The flow interpreter never talks to a browser directly. It drives an
//! implementation of [`Driver`] through a small set of primitives:
//! - navigate, wait_for, press_key, sleep
//! - fill, type_text, select, toggle, click
//! - enter_frame / exit_frame for embedded documents
//!
//! [`ScriptedDriver`] is an in-process implementation that records every call
//! and fails on demand; it backs dry runs and tests.

mod driver;
pub mod errors;
mod scripted;
pub mod types;

pub use driver::*;
pub use errors::*;
pub use scripted::*;
pub use types::*;
