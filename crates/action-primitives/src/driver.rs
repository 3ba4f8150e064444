use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DriverError;
use crate::types::{DriverSession, FrameHandle};

/// Driver primitives trait
///
/// Every interaction is scoped to a [`FrameHandle`]; the caller decides which
/// frame is current. Implementations must not retry on their own: failures are
/// reported immediately and the engine applies its own retry policy.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate the top-level page to a URL
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Wait until an element matching `selector` is present
    async fn wait_for(
        &self,
        frame: &FrameHandle,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<(), DriverError>;

    /// Replace the content of an input with `value`
    async fn fill(&self, frame: &FrameHandle, selector: &str, value: &str)
        -> Result<(), DriverError>;

    /// Type `text` key by key, pausing `delay_ms` between keystrokes
    async fn type_text(
        &self,
        frame: &FrameHandle,
        selector: &str,
        text: &str,
        delay_ms: u64,
    ) -> Result<(), DriverError>;

    /// Pick an option of a select element by value or label
    async fn select(
        &self,
        frame: &FrameHandle,
        selector: &str,
        value: &str,
    ) -> Result<(), DriverError>;

    /// Set a checkbox or switch to `checked`
    async fn toggle(
        &self,
        frame: &FrameHandle,
        selector: &str,
        checked: bool,
    ) -> Result<(), DriverError>;

    /// Click an element
    async fn click(&self, frame: &FrameHandle, selector: &str) -> Result<(), DriverError>;

    /// Enter an embedded frame located inside `parent`
    async fn enter_frame(
        &self,
        parent: &FrameHandle,
        selector: &str,
    ) -> Result<FrameHandle, DriverError>;

    /// Leave a frame previously returned by [`Driver::enter_frame`]
    async fn exit_frame(&self, frame: &FrameHandle) -> Result<(), DriverError>;

    /// Press a keyboard key, optionally focusing `selector` first
    async fn press_key(
        &self,
        frame: &FrameHandle,
        selector: Option<&str>,
        key: &str,
    ) -> Result<(), DriverError>;

    /// Pause the flow
    async fn sleep(&self, ms: u64) -> Result<(), DriverError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    /// Release the browser context. `failed` tells the backend whether the
    /// attempt ended in error so it can keep or discard traces.
    async fn close(&self, _failed: bool) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Opens one driver per item attempt.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self, session: &DriverSession) -> Result<Box<dyn Driver>, DriverError>;
}
