//! Error types for driver primitives

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a driver failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    /// Navigation did not complete in time
    NavTimeout,

    /// Element did not appear before the wait deadline
    WaitTimeout,

    /// Element could not be located in the current frame
    ElementNotFound,

    /// Element is present but cannot receive the interaction
    NotInteractable,

    /// Dropdown option was not found
    OptionNotFound,

    /// Frame selector did not resolve to an embedded document
    FrameNotFound,

    /// The supplied URL or key is not acceptable to the backend
    InvalidInput,

    /// Transport or protocol failure talking to the browser
    Io,

    /// Anything else
    Internal,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DriverErrorKind::NavTimeout => "navigation timeout",
            DriverErrorKind::WaitTimeout => "wait timeout",
            DriverErrorKind::ElementNotFound => "element not found",
            DriverErrorKind::NotInteractable => "element not interactable",
            DriverErrorKind::OptionNotFound => "option not found",
            DriverErrorKind::FrameNotFound => "frame not found",
            DriverErrorKind::InvalidInput => "invalid input",
            DriverErrorKind::Io => "driver i/o error",
            DriverErrorKind::Internal => "internal driver error",
        };
        f.write_str(label)
    }
}

/// Structured failure reported by a driver primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    /// Screenshot captured by the backend at the moment of failure.
    pub screenshot: Option<String>,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            screenshot: None,
        }
    }

    pub fn element_not_found(selector: &str) -> Self {
        Self::new(
            DriverErrorKind::ElementNotFound,
            format!("no element matches '{selector}'"),
        )
    }

    pub fn wait_timeout(selector: &str, timeout_ms: u64) -> Self {
        Self::new(
            DriverErrorKind::WaitTimeout,
            format!("'{selector}' did not appear within {timeout_ms}ms"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Internal, message)
    }

    pub fn with_screenshot(mut self, path: impl Into<String>) -> Self {
        self.screenshot = Some(path.into());
        self
    }
}
