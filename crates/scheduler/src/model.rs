use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use action_flow::InterpreterSettings;
use leadflow_core_types::FlowKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// What happens to running items when a run is cancelled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// In-flight attempts finish normally but are not retried
    #[default]
    Drain,
    /// In-flight attempts stop at the next step boundary and end cancelled
    Interrupt,
}

impl StopPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            StopPolicy::Drain => "drain",
            StopPolicy::Interrupt => "interrupt",
        }
    }
}

impl fmt::Display for StopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StopPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(StopPolicy::Drain),
            "interrupt" => Ok(StopPolicy::Interrupt),
            other => Err(format!("unknown stop policy '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryOpt {
    /// Total attempts per item, the first one included
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryOpt {
    /// Pause before the attempt following `failed_attempt`; grows linearly.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        self.backoff * failed_attempt
    }
}

impl Default for RetryOpt {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Workers per run unless the request overrides it
    pub concurrency: usize,
    pub retry: RetryOpt,
    pub stop_policy: StopPolicy,
    /// Reject runs that schedule two flows for one platform
    pub one_flow_per_platform: bool,
    /// Root for per-item artifact directories
    pub artifacts_dir: Option<PathBuf>,
    pub interpreter: InterpreterSettings,
}

impl SchedulerConfig {
    pub(crate) fn settings_json(&self, concurrency: usize) -> Value {
        json!({
            "concurrency": concurrency,
            "max_attempts": self.retry.max_attempts,
            "retry_backoff_ms": self.retry.backoff.as_millis() as u64,
            "stop_policy": self.stop_policy.as_str(),
            "one_flow_per_platform": self.one_flow_per_platform,
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            retry: RetryOpt::default(),
            stop_policy: StopPolicy::default(),
            one_flow_per_platform: true,
            artifacts_dir: None,
            interpreter: InterpreterSettings::default(),
        }
    }
}

/// One lead to push through one flow.
#[derive(Clone, Debug, PartialEq)]
pub struct RunItem {
    pub lead_id: String,
    pub lead: Value,
    pub flow: FlowKey,
}

impl RunItem {
    pub fn new(lead_id: impl Into<String>, lead: Value, flow: FlowKey) -> Self {
        Self {
            lead_id: lead_id.into(),
            lead,
            flow,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    pub items: Vec<RunItem>,
    pub concurrency: Option<usize>,
}

impl RunRequest {
    pub fn new(items: Vec<RunItem>) -> Self {
        Self {
            items,
            concurrency: None,
        }
    }

    /// Every lead through every flow, lead-major.
    pub fn for_leads(leads: Vec<(String, Value)>, flows: &[FlowKey]) -> Self {
        let items = leads
            .into_iter()
            .flat_map(|(lead_id, lead)| {
                flows
                    .iter()
                    .map(move |flow| RunItem::new(lead_id.clone(), lead.clone(), flow.clone()))
            })
            .collect();
        Self::new(items)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}
