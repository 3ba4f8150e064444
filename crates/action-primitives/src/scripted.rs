//! Scripted driver - records calls and fails on demand
//!
//! Used for dry runs from the command line and throughout the test suites.
//! A [`Script`] is shared by every driver a [`ScriptedDriverFactory`] opens, so
//! failure budgets and the call log span retries and concurrent items.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::driver::{Driver, DriverFactory};
use crate::errors::{DriverError, DriverErrorKind};
use crate::types::{DriverAction, DriverCall, DriverSession, FrameHandle};

/// Makes matching calls fail.
#[derive(Debug, Clone)]
pub struct FailureRule {
    pub action: Option<DriverAction>,
    pub target: Option<String>,
    pub value: Option<String>,
    /// Remaining failures; `None` fails forever.
    pub remaining: Option<u32>,
    pub error: DriverError,
}

impl FailureRule {
    fn matches(&self, action: DriverAction, target: Option<&str>, value: Option<&str>) -> bool {
        if self.remaining == Some(0) {
            return false;
        }
        if self.action.is_some_and(|expected| expected != action) {
            return false;
        }
        if let Some(expected) = self.target.as_deref() {
            if target != Some(expected) {
                return false;
            }
        }
        if let Some(expected) = self.value.as_deref() {
            if value != Some(expected) {
                return false;
            }
        }
        true
    }
}

/// Shared behaviour and call log for scripted drivers.
#[derive(Debug, Default)]
pub struct Script {
    rules: Mutex<Vec<FailureRule>>,
    gates: Vec<(String, Arc<Semaphore>)>,
    action_delay: Duration,
    calls: Mutex<Vec<DriverCall>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every interaction with `selector` fails.
    pub fn fail_on(self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        let error = DriverError::element_not_found(&selector);
        self.with_rule(FailureRule {
            action: None,
            target: Some(selector),
            value: None,
            remaining: None,
            error,
        })
    }

    /// The first `times` interactions with `selector` fail.
    pub fn fail_times(self, selector: impl Into<String>, times: u32) -> Self {
        let selector = selector.into();
        let error = DriverError::new(
            DriverErrorKind::NotInteractable,
            format!("'{selector}' is not ready"),
        );
        self.with_rule(FailureRule {
            action: None,
            target: Some(selector),
            value: None,
            remaining: Some(times),
            error,
        })
    }

    /// Interactions with `selector` fail when they carry `value`.
    pub fn fail_on_value(self, selector: impl Into<String>, value: impl Into<String>) -> Self {
        let selector = selector.into();
        let value = value.into();
        let error = DriverError::new(
            DriverErrorKind::OptionNotFound,
            format!("'{selector}' rejected value '{value}'"),
        );
        self.with_rule(FailureRule {
            action: None,
            target: Some(selector),
            value: Some(value),
            remaining: None,
            error,
        })
    }

    pub fn with_rule(self, rule: FailureRule) -> Self {
        self.rules.lock().push(rule);
        self
    }

    /// Interactions with `selector` wait for a permit from `gate` first.
    pub fn gate(mut self, selector: impl Into<String>, gate: Arc<Semaphore>) -> Self {
        self.gates.push((selector.into(), gate));
        self
    }

    /// Delay applied before every recorded call.
    pub fn action_delay(mut self, delay: Duration) -> Self {
        self.action_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, action: DriverAction) -> Vec<DriverCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.action == action)
            .cloned()
            .collect()
    }

    async fn perform(
        &self,
        action: DriverAction,
        frame: &FrameHandle,
        target: Option<&str>,
        value: Option<&str>,
    ) -> Result<(), DriverError> {
        if let Some(target) = target {
            for (selector, gate) in &self.gates {
                if selector == target {
                    gate.acquire()
                        .await
                        .map_err(|_| DriverError::internal("scripted gate closed"))?
                        .forget();
                }
            }
        }
        if !self.action_delay.is_zero() {
            tokio::time::sleep(self.action_delay).await;
        }

        debug!(
            action = %action,
            frame = %frame,
            target = target.unwrap_or(""),
            "scripted driver call"
        );
        self.calls.lock().push(DriverCall {
            action,
            frame: frame.id.clone(),
            target: target.map(str::to_string),
            value: value.map(str::to_string),
        });

        let mut rules = self.rules.lock();
        if let Some(rule) = rules
            .iter_mut()
            .find(|rule| rule.matches(action, target, value))
        {
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(rule.error.clone());
        }
        Ok(())
    }
}

/// Driver that performs no browser work.
pub struct ScriptedDriver {
    script: Arc<Script>,
    frames: AtomicU32,
}

impl ScriptedDriver {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            frames: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::Navigate, &FrameHandle::root(), Some(url), None)
            .await
    }

    async fn wait_for(
        &self,
        frame: &FrameHandle,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<(), DriverError> {
        self.script
            .perform(
                DriverAction::WaitFor,
                frame,
                Some(selector),
                Some(&timeout_ms.to_string()),
            )
            .await
    }

    async fn fill(
        &self,
        frame: &FrameHandle,
        selector: &str,
        value: &str,
    ) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::Fill, frame, Some(selector), Some(value))
            .await
    }

    async fn type_text(
        &self,
        frame: &FrameHandle,
        selector: &str,
        text: &str,
        _delay_ms: u64,
    ) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::TypeText, frame, Some(selector), Some(text))
            .await
    }

    async fn select(
        &self,
        frame: &FrameHandle,
        selector: &str,
        value: &str,
    ) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::Select, frame, Some(selector), Some(value))
            .await
    }

    async fn toggle(
        &self,
        frame: &FrameHandle,
        selector: &str,
        checked: bool,
    ) -> Result<(), DriverError> {
        let value = if checked { "true" } else { "false" };
        self.script
            .perform(DriverAction::Toggle, frame, Some(selector), Some(value))
            .await
    }

    async fn click(&self, frame: &FrameHandle, selector: &str) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::Click, frame, Some(selector), None)
            .await
    }

    async fn enter_frame(
        &self,
        parent: &FrameHandle,
        selector: &str,
    ) -> Result<FrameHandle, DriverError> {
        self.script
            .perform(DriverAction::EnterFrame, parent, Some(selector), None)
            .await?;
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(FrameHandle::child(format!("frame-{n}"), selector))
    }

    async fn exit_frame(&self, frame: &FrameHandle) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::ExitFrame, frame, frame.selector.as_deref(), None)
            .await
    }

    async fn press_key(
        &self,
        frame: &FrameHandle,
        selector: Option<&str>,
        key: &str,
    ) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::PressKey, frame, selector, Some(key))
            .await
    }

    async fn sleep(&self, ms: u64) -> Result<(), DriverError> {
        self.script
            .perform(DriverAction::Sleep, &FrameHandle::root(), None, Some(&ms.to_string()))
            .await?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn close(&self, failed: bool) -> Result<(), DriverError> {
        let value = if failed { "failed" } else { "ok" };
        self.script
            .perform(DriverAction::Close, &FrameHandle::root(), None, Some(value))
            .await
    }
}

/// Factory handing out [`ScriptedDriver`]s over one shared [`Script`].
pub struct ScriptedDriverFactory {
    script: Arc<Script>,
    opened: AtomicUsize,
    sessions: Mutex<Vec<DriverSession>>,
}

impl ScriptedDriverFactory {
    pub fn new(script: Script) -> Self {
        Self::shared(Arc::new(script))
    }

    pub fn shared(script: Arc<Script>) -> Self {
        Self {
            script,
            opened: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self) -> Arc<Script> {
        Arc::clone(&self.script)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn sessions(&self) -> Vec<DriverSession> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl DriverFactory for ScriptedDriverFactory {
    async fn create(&self, session: &DriverSession) -> Result<Box<dyn Driver>, DriverError> {
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().push(session.clone());
        Ok(Box::new(ScriptedDriver::new(Arc::clone(&self.script))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let script = Arc::new(Script::new());
        let driver = ScriptedDriver::new(Arc::clone(&script));
        let root = FrameHandle::root();

        driver.navigate("https://example.test").await.unwrap();
        driver.fill(&root, "#name", "Ada").await.unwrap();
        driver.click(&root, "#next").await.unwrap();

        let calls = script.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].action, DriverAction::Navigate);
        assert_eq!(calls[1].value.as_deref(), Some("Ada"));
        assert_eq!(calls[2].target.as_deref(), Some("#next"));
    }

    #[tokio::test]
    async fn fail_times_recovers_after_budget() {
        let script = Arc::new(Script::new().fail_times("#submit", 2));
        let driver = ScriptedDriver::new(Arc::clone(&script));
        let root = FrameHandle::root();

        assert!(driver.click(&root, "#submit").await.is_err());
        assert!(driver.click(&root, "#submit").await.is_err());
        assert!(driver.click(&root, "#submit").await.is_ok());
    }

    #[tokio::test]
    async fn fail_on_value_only_hits_matching_value() {
        let script = Arc::new(Script::new().fail_on_value("#status", "RETIRED"));
        let driver = ScriptedDriver::new(script);
        let root = FrameHandle::root();

        assert!(driver.select(&root, "#status", "TNS").await.is_ok());
        let err = driver.select(&root, "#status", "RETIRED").await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::OptionNotFound);
    }

    #[tokio::test]
    async fn entered_frames_get_distinct_handles() {
        let driver = ScriptedDriver::new(Arc::new(Script::new()));
        let root = FrameHandle::root();

        let first = driver.enter_frame(&root, "iframe#quote").await.unwrap();
        let second = driver.enter_frame(&first, "iframe#inner").await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(!first.is_root());
        assert_eq!(second.selector.as_deref(), Some("iframe#inner"));
    }

    #[test]
    fn factory_counts_sessions() {
        let factory = ScriptedDriverFactory::new(Script::new());
        let session = DriverSession {
            run_id: leadflow_core_types::RunId::new(),
            item_id: leadflow_core_types::ItemId::new(),
            attempt: 1,
            platform: "acme".to_string(),
            artifact_dir: None,
            trace: crate::TraceMode::Off,
        };
        let driver = tokio_test::block_on(factory.create(&session));
        assert!(driver.is_ok());
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.sessions()[0].platform, "acme");
    }
}
