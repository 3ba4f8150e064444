//! Core data types for driver primitives

use std::fmt;
use std::path::PathBuf;

use leadflow_core_types::{ItemId, RunId};
use serde::{Deserialize, Serialize};

/// Reference to the document an action is scoped to.
///
/// The root handle stands for the top-level page; handles returned by
/// [`crate::Driver::enter_frame`] point at embedded frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameHandle {
    /// Backend-specific identifier
    pub id: String,

    /// Selector used to enter the frame, `None` for the root page
    pub selector: Option<String>,
}

impl FrameHandle {
    pub const ROOT_ID: &'static str = "main";

    pub fn root() -> Self {
        Self {
            id: Self::ROOT_ID.to_string(),
            selector: None,
        }
    }

    pub fn child(id: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selector: Some(selector.into()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.selector.is_none()
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Some(selector) => write!(f, "{}({})", self.id, selector),
            None => f.write_str(&self.id),
        }
    }
}

/// Browser trace recording requested by a flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceMode {
    #[default]
    Off,
    On,
    /// Record, but keep the trace only when the item fails.
    RetainOnFailure,
}

/// Everything a factory needs to open a driver for one item attempt.
#[derive(Debug, Clone)]
pub struct DriverSession {
    pub run_id: RunId,
    pub item_id: ItemId,
    pub attempt: u32,
    pub platform: String,
    /// Directory where screenshots and traces for this item belong.
    pub artifact_dir: Option<PathBuf>,
    pub trace: TraceMode,
}

/// Name of a driver primitive, used for logging and scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverAction {
    Navigate,
    WaitFor,
    Fill,
    TypeText,
    Select,
    Toggle,
    Click,
    EnterFrame,
    ExitFrame,
    PressKey,
    Sleep,
    Close,
}

impl DriverAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverAction::Navigate => "navigate",
            DriverAction::WaitFor => "wait_for",
            DriverAction::Fill => "fill",
            DriverAction::TypeText => "type_text",
            DriverAction::Select => "select",
            DriverAction::Toggle => "toggle",
            DriverAction::Click => "click",
            DriverAction::EnterFrame => "enter_frame",
            DriverAction::ExitFrame => "exit_frame",
            DriverAction::PressKey => "press_key",
            DriverAction::Sleep => "sleep",
            DriverAction::Close => "close",
        }
    }
}

impl fmt::Display for DriverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call observed by the scripted driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCall {
    pub action: DriverAction,
    pub frame: String,
    pub target: Option<String>,
    pub value: Option<String>,
}
