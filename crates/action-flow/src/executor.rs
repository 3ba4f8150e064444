//! Flow interpreter implementation

use std::time::Instant;

use action_primitives::{Driver, DriverError, DriverErrorKind};
use async_trait::async_trait;
use leadflow_core_types::{ItemId, RunId, StepLogEntry, StepOutcome, REDACTED};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::condition;
use crate::context::FrameStack;
use crate::resolve::{interpolate, resolve_and_map, scalar_text, toggle_state, ResolutionScope};
use crate::types::{Flow, Step, StepAction};

/// Defaults applied when a step leaves a timing unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterSettings {
    pub default_wait_timeout_ms: u64,
    pub default_type_delay_ms: u64,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            default_wait_timeout_ms: 10_000,
            default_type_delay_ms: 50,
        }
    }
}

/// Identity written onto every log entry.
#[derive(Debug, Clone, Default)]
pub struct StepStamp {
    pub run_id: Option<RunId>,
    pub item_id: Option<ItemId>,
    pub attempt: u32,
}

/// Hooks invoked around each step, in step order.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn step_started(&self, _index: usize, _total: usize) {}

    async fn step_finished(&self, _entry: &StepLogEntry) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl StepObserver for NoopObserver {}

/// How an interpreted flow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Every step ran; optional failures may be present in the log
    Completed,

    /// A non-optional step failed; later steps were not attempted
    Failed {
        step_index: usize,
        message: String,
        artifact: Option<String>,
    },

    /// Cancellation was observed before `next_step` started
    Cancelled { next_step: usize },
}

impl FlowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlowOutcome::Completed)
    }
}

/// Step log plus outcome of one flow execution.
#[derive(Debug, Clone)]
pub struct FlowRun {
    pub entries: Vec<StepLogEntry>,
    pub outcome: FlowOutcome,
    pub duration_ms: u64,
}

/// Executes flows step by step against a driver.
///
/// The interpreter keeps no state between calls; the frame stack lives for
/// one `run` only.
#[derive(Debug, Clone, Default)]
pub struct FlowInterpreter {
    settings: InterpreterSettings,
}

impl FlowInterpreter {
    pub fn new(settings: InterpreterSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> InterpreterSettings {
        self.settings
    }

    /// Run `flow` for one lead.
    ///
    /// `cancel` is only checked between steps; a step already handed to the
    /// driver always completes.
    pub async fn run(
        &self,
        flow: &Flow,
        scope: &ResolutionScope<'_>,
        driver: &dyn Driver,
        observer: &dyn StepObserver,
        stamp: &StepStamp,
        cancel: Option<&CancellationToken>,
    ) -> FlowRun {
        let started = Instant::now();
        let total = flow.steps.len();
        let mut frames = FrameStack::default();
        let mut entries = Vec::with_capacity(total);
        let mut outcome = FlowOutcome::Completed;

        info!(
            flow = %flow.key,
            item_id = ?stamp.item_id.as_ref().map(|id| id.0.as_str()),
            attempt = stamp.attempt,
            steps = total,
            "Executing flow"
        );

        for (index, step) in flow.steps.iter().enumerate() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                info!(flow = %flow.key, next_step = index, "Cancellation observed between steps");
                outcome = FlowOutcome::Cancelled { next_step: index };
                break;
            }

            observer.step_started(index, total).await;
            let step_started = Instant::now();
            let mut entry = self.entry_for(index, step, stamp);

            if !condition::evaluate(step.when.as_ref(), scope.lead) {
                debug!(step = index, step_type = step.action.type_name(), "Guard false, skipping step");
                entry.outcome = StepOutcome::Skipped;
                entry.duration_ms = elapsed_ms(step_started);
                observer.step_finished(&entry).await;
                entries.push(entry);
                continue;
            }

            let result = self
                .dispatch(&step.action, scope, driver, &mut frames, &mut entry)
                .await;
            entry.duration_ms = elapsed_ms(step_started);

            let mut fatal = None;
            if let Err(err) = result {
                let message = format!("{} failed: {}", describe(index, step), err);
                entry.success = false;
                entry.error = Some(err.to_string());
                entry.artifact = err.screenshot.clone();
                if step.optional {
                    warn!(step = index, error = %err, "Optional step failed, continuing");
                    entry.outcome = StepOutcome::FailedOptional;
                } else {
                    warn!(step = index, error = %err, "Step failed, aborting flow");
                    entry.outcome = StepOutcome::Failed;
                    fatal = Some(FlowOutcome::Failed {
                        step_index: index,
                        message,
                        artifact: err.screenshot,
                    });
                }
            } else {
                debug!(
                    step = index,
                    step_type = step.action.type_name(),
                    duration_ms = entry.duration_ms,
                    "Step completed"
                );
            }

            observer.step_finished(&entry).await;
            entries.push(entry);

            if let Some(failed) = fatal {
                outcome = failed;
                break;
            }
        }

        let duration_ms = elapsed_ms(started);
        match &outcome {
            FlowOutcome::Completed => info!(flow = %flow.key, duration_ms, "Flow completed"),
            FlowOutcome::Failed { message, .. } => {
                warn!(flow = %flow.key, duration_ms, error = %message, "Flow failed")
            }
            FlowOutcome::Cancelled { .. } => info!(flow = %flow.key, duration_ms, "Flow cancelled"),
        }

        FlowRun {
            entries,
            outcome,
            duration_ms,
        }
    }

    fn entry_for(&self, index: usize, step: &Step, stamp: &StepStamp) -> StepLogEntry {
        let mut entry = StepLogEntry::new(index, step.action.type_name(), action_name(&step.action));
        entry.run_id = stamp.run_id.clone();
        entry.item_id = stamp.item_id.clone();
        entry.attempt = stamp.attempt;
        entry.label = step.label.clone();
        entry.selector = step.action.selector().map(str::to_string);
        entry.field = step
            .action
            .value_spec()
            .and_then(|spec| spec.lead_key.clone());
        entry
    }

    async fn dispatch(
        &self,
        action: &StepAction,
        scope: &ResolutionScope<'_>,
        driver: &dyn Driver,
        frames: &mut FrameStack,
        entry: &mut StepLogEntry,
    ) -> Result<(), DriverError> {
        match action {
            StepAction::Goto { url } => {
                let (target, sensitive) = interpolate(url, scope);
                record_values(
                    entry,
                    Some(Value::String(url.clone())),
                    Some(Value::String(target.clone())),
                    sensitive,
                );
                url::Url::parse(&target).map_err(|err| {
                    let shown = if sensitive { REDACTED } else { target.as_str() };
                    DriverError::new(
                        DriverErrorKind::InvalidInput,
                        format!("'{shown}' is not a valid URL: {err}"),
                    )
                })?;
                driver.navigate(&target).await
            }
            StepAction::WaitField {
                selector,
                timeout_ms,
            } => {
                let timeout = timeout_ms.unwrap_or(self.settings.default_wait_timeout_ms);
                driver.wait_for(frames.current(), selector, timeout).await
            }
            StepAction::Fill { selector, value } => {
                let resolved = resolve_and_map(value, scope);
                let text = scalar_text(resolved.mapped.as_ref());
                record_values(entry, resolved.raw, resolved.mapped, resolved.sensitive);
                driver.fill(frames.current(), selector, &text).await
            }
            StepAction::Type {
                selector,
                text,
                delay_ms,
            } => {
                let (typed, sensitive) = interpolate(text, scope);
                record_values(
                    entry,
                    Some(Value::String(text.clone())),
                    Some(Value::String(typed.clone())),
                    sensitive,
                );
                let delay = delay_ms.unwrap_or(self.settings.default_type_delay_ms);
                driver.type_text(frames.current(), selector, &typed, delay).await
            }
            StepAction::Select { selector, value } => {
                let resolved = resolve_and_map(value, scope);
                let option = scalar_text(resolved.mapped.as_ref());
                record_values(entry, resolved.raw, resolved.mapped, resolved.sensitive);
                driver.select(frames.current(), selector, &option).await
            }
            StepAction::Toggle { selector, value } => {
                let resolved = resolve_and_map(value, scope);
                let checked = toggle_state(value, resolved.mapped.as_ref());
                record_values(entry, resolved.raw, Some(Value::Bool(checked)), resolved.sensitive);
                driver.toggle(frames.current(), selector, checked).await
            }
            StepAction::Click { selector } => driver.click(frames.current(), selector).await,
            StepAction::EnterFrame { selector } => {
                let frame = driver.enter_frame(frames.current(), selector).await?;
                debug!(frame = %frame, "Entered frame");
                frames.enter(frame);
                Ok(())
            }
            StepAction::ExitFrame => match frames.exit() {
                Some(frame) => driver.exit_frame(&frame).await,
                None => {
                    debug!("exitFrame at root frame, nothing to leave");
                    Ok(())
                }
            },
            StepAction::Sleep { ms } => driver.sleep(*ms).await,
            StepAction::PressKey { key, selector } => {
                entry.raw_value = Some(Value::String(key.clone()));
                driver
                    .press_key(frames.current(), selector.as_deref(), key)
                    .await
            }
            StepAction::Comment { text } => {
                entry.raw_value = Some(Value::String(text.clone()));
                Ok(())
            }
        }
    }
}

/// Driver primitive a step maps to.
fn action_name(action: &StepAction) -> &'static str {
    match action {
        StepAction::Goto { .. } => "navigate",
        StepAction::WaitField { .. } => "wait_for",
        StepAction::Fill { .. } => "fill",
        StepAction::Type { .. } => "type_text",
        StepAction::Select { .. } => "select",
        StepAction::Toggle { .. } => "toggle",
        StepAction::Click { .. } => "click",
        StepAction::EnterFrame { .. } => "enter_frame",
        StepAction::ExitFrame => "exit_frame",
        StepAction::Sleep { .. } => "sleep",
        StepAction::PressKey { .. } => "press_key",
        StepAction::Comment { .. } => "none",
    }
}

fn record_values(entry: &mut StepLogEntry, raw: Option<Value>, mapped: Option<Value>, sensitive: bool) {
    if sensitive {
        let redacted = || Some(Value::String(REDACTED.to_string()));
        entry.raw_value = raw.and_then(|_| redacted());
        entry.mapped_value = mapped.and_then(|_| redacted());
    } else {
        entry.raw_value = raw;
        entry.mapped_value = mapped;
    }
}

fn describe(index: usize, step: &Step) -> String {
    match (&step.label, step.action.selector()) {
        (Some(label), _) => format!("step {} ({})", index + 1, label),
        (None, Some(selector)) => {
            format!("step {} ({} {})", index + 1, step.action.type_name(), selector)
        }
        (None, None) => format!("step {} ({})", index + 1, step.action.type_name()),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
