//! Core types for flow definitions

use std::collections::BTreeMap;

use action_primitives::TraceMode;
use leadflow_core_types::FlowKey;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Flow definition - an ordered list of steps for one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Platform and slug
    #[serde(flatten)]
    pub key: FlowKey,

    /// Display name
    pub name: String,

    /// Browser trace recording
    #[serde(default)]
    pub trace: TraceMode,

    /// Steps, executed strictly in order
    pub steps: Vec<Step>,
}

impl Flow {
    /// Create a new flow
    pub fn new(key: FlowKey, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            key,
            name: name.into(),
            trace: TraceMode::Off,
            steps,
        }
    }

    /// Set trace mode
    pub fn with_trace(mut self, trace: TraceMode) -> Self {
        self.trace = trace;
        self
    }

    pub fn platform(&self) -> &str {
        &self.key.platform
    }
}

/// One declarative action plus the fields every step shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Human-readable name used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// A failure of an optional step is logged and the flow continues
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,

    /// Guard; the step is skipped when it evaluates to false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<WhenCondition>,

    #[serde(flatten)]
    pub action: StepAction,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            label: None,
            optional: false,
            when: None,
            action,
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn when(mut self, condition: WhenCondition) -> Self {
        self.when = Some(condition);
        self
    }

    pub fn goto(url: impl Into<String>) -> Self {
        Self::new(StepAction::Goto { url: url.into() })
    }

    pub fn wait_field(selector: impl Into<String>) -> Self {
        Self::new(StepAction::WaitField {
            selector: selector.into(),
            timeout_ms: None,
        })
    }

    pub fn fill(selector: impl Into<String>, value: ValueSpec) -> Self {
        Self::new(StepAction::Fill {
            selector: selector.into(),
            value,
        })
    }

    pub fn type_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(StepAction::Type {
            selector: selector.into(),
            text: text.into(),
            delay_ms: None,
        })
    }

    pub fn select(selector: impl Into<String>, value: ValueSpec) -> Self {
        Self::new(StepAction::Select {
            selector: selector.into(),
            value,
        })
    }

    pub fn toggle(selector: impl Into<String>, value: ValueSpec) -> Self {
        Self::new(StepAction::Toggle {
            selector: selector.into(),
            value,
        })
    }

    pub fn click(selector: impl Into<String>) -> Self {
        Self::new(StepAction::Click {
            selector: selector.into(),
        })
    }

    pub fn enter_frame(selector: impl Into<String>) -> Self {
        Self::new(StepAction::EnterFrame {
            selector: selector.into(),
        })
    }

    pub fn exit_frame() -> Self {
        Self::new(StepAction::ExitFrame)
    }

    pub fn sleep(ms: u64) -> Self {
        Self::new(StepAction::Sleep { ms })
    }

    pub fn press_key(key: impl Into<String>) -> Self {
        Self::new(StepAction::PressKey {
            key: key.into(),
            selector: None,
        })
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self::new(StepAction::Comment { text: text.into() })
    }
}

/// Step kinds. The interpreter matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepAction {
    /// Navigate to a URL (templated)
    Goto { url: String },

    /// Wait until a field is present
    WaitField {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    /// Replace an input's content with the resolved value
    Fill {
        selector: String,
        #[serde(flatten)]
        value: ValueSpec,
    },

    /// Type literal (templated) text keystroke by keystroke
    Type {
        selector: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },

    /// Choose a dropdown option
    Select {
        selector: String,
        #[serde(flatten)]
        value: ValueSpec,
    },

    /// Check or uncheck a box
    Toggle {
        selector: String,
        #[serde(flatten)]
        value: ValueSpec,
    },

    Click { selector: String },

    /// Scope subsequent actions to an embedded frame
    EnterFrame { selector: String },

    /// Return to the enclosing frame
    ExitFrame,

    Sleep { ms: u64 },

    PressKey {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },

    /// Log annotation only
    Comment { text: String },
}

impl StepAction {
    /// Discriminator as written in flow documents
    pub fn type_name(&self) -> &'static str {
        match self {
            StepAction::Goto { .. } => "goto",
            StepAction::WaitField { .. } => "waitField",
            StepAction::Fill { .. } => "fill",
            StepAction::Type { .. } => "type",
            StepAction::Select { .. } => "select",
            StepAction::Toggle { .. } => "toggle",
            StepAction::Click { .. } => "click",
            StepAction::EnterFrame { .. } => "enterFrame",
            StepAction::ExitFrame => "exitFrame",
            StepAction::Sleep { .. } => "sleep",
            StepAction::PressKey { .. } => "pressKey",
            StepAction::Comment { .. } => "comment",
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            StepAction::WaitField { selector, .. }
            | StepAction::Fill { selector, .. }
            | StepAction::Type { selector, .. }
            | StepAction::Select { selector, .. }
            | StepAction::Toggle { selector, .. }
            | StepAction::Click { selector }
            | StepAction::EnterFrame { selector } => Some(selector),
            StepAction::PressKey { selector, .. } => selector.as_deref(),
            StepAction::Goto { .. }
            | StepAction::ExitFrame
            | StepAction::Sleep { .. }
            | StepAction::Comment { .. } => None,
        }
    }

    pub fn value_spec(&self) -> Option<&ValueSpec> {
        match self {
            StepAction::Fill { value, .. }
            | StepAction::Select { value, .. }
            | StepAction::Toggle { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Where a value-bearing step gets its value from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSpec {
    /// Static value; strings may contain `{{ path }}` placeholders
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,

    /// Dot path into the lead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_key: Option<String>,

    /// Translation from domain values to platform values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_map: Option<ValueMap>,
}

impl ValueSpec {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn lead_key(path: impl Into<String>) -> Self {
        Self {
            lead_key: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn mapped(mut self, map: ValueMap) -> Self {
        self.value_map = Some(map);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.lead_key.is_none()
    }
}

/// Key used as the fallback entry of a [`ValueMap`].
pub const WILDCARD: &str = "*";

/// Translation table keyed by the raw value's text form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueMap(pub BTreeMap<String, Value>);

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Exact match on the raw value, then the `*` entry.
    pub fn lookup(&self, raw: Option<&Value>) -> Option<&Value> {
        raw.and_then(|raw| self.0.get(&map_key(raw)))
            .or_else(|| self.0.get(WILDCARD))
    }
}

fn map_key(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Guard condition over a lead field.
///
/// A leaf names a `field` and one operator; `and`/`or` combine
/// sub-conditions. When several operators are set the first in
/// [`WhenCondition::op`] order wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhenCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_empty: Option<bool>,

    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub equals: Option<Value>,

    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_equals: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_one_of: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<WhenCondition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<WhenCondition>>,
}

/// Borrowed view of the operator a condition applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConditionOp<'a> {
    And(&'a [WhenCondition]),
    Or(&'a [WhenCondition]),
    IsEmpty(bool),
    Equals(&'a Value),
    NotEquals(&'a Value),
    OneOf(&'a [Value]),
    NotOneOf(&'a [Value]),
    /// No operator: the step always runs
    Always,
}

impl WhenCondition {
    pub fn op(&self) -> ConditionOp<'_> {
        if let Some(children) = &self.and {
            return ConditionOp::And(children);
        }
        if let Some(children) = &self.or {
            return ConditionOp::Or(children);
        }
        if let Some(expect_empty) = self.is_empty {
            return ConditionOp::IsEmpty(expect_empty);
        }
        if let Some(value) = &self.equals {
            return ConditionOp::Equals(value);
        }
        if let Some(value) = &self.not_equals {
            return ConditionOp::NotEquals(value);
        }
        if let Some(values) = &self.one_of {
            return ConditionOp::OneOf(values);
        }
        if let Some(values) = &self.not_one_of {
            return ConditionOp::NotOneOf(values);
        }
        ConditionOp::Always
    }

    fn on(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(field: impl Into<String>) -> Self {
        Self {
            is_empty: Some(true),
            ..Self::on(field)
        }
    }

    pub fn is_not_empty(field: impl Into<String>) -> Self {
        Self {
            is_empty: Some(false),
            ..Self::on(field)
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            equals: Some(value.into()),
            ..Self::on(field)
        }
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            not_equals: Some(value.into()),
            ..Self::on(field)
        }
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            one_of: Some(values),
            ..Self::on(field)
        }
    }

    pub fn not_one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            not_one_of: Some(values),
            ..Self::on(field)
        }
    }

    pub fn all(children: Vec<WhenCondition>) -> Self {
        Self {
            and: Some(children),
            ..Self::default()
        }
    }

    pub fn any(children: Vec<WhenCondition>) -> Self {
        Self {
            or: Some(children),
            ..Self::default()
        }
    }
}

/// Keeps an explicit `null` distinct from an absent key.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_flow_document() {
        let doc = json!({
            "platform": "acme",
            "slug": "quote",
            "name": "Acme quote",
            "trace": "retainOnFailure",
            "steps": [
                { "type": "goto", "url": "https://acme.test/login" },
                { "type": "waitField", "selector": "#user", "timeoutMs": 5000 },
                { "type": "fill", "selector": "#zip", "leadKey": "project.zip" },
                { "type": "select", "selector": "#status", "leadKey": "subscriber.status",
                  "valueMap": { "TNS": "independent", "*": "other" },
                  "when": { "field": "subscriber.status", "isEmpty": false } },
                { "type": "click", "selector": "#cookie", "optional": true, "label": "cookie banner" },
                { "type": "exitFrame" },
                { "type": "type", "selector": "#pwd", "text": "{{ credentials.password }}", "delayMs": 20 }
            ]
        });

        let flow: Flow = serde_json::from_value(doc).unwrap();
        assert_eq!(flow.key, FlowKey::new("acme", "quote"));
        assert_eq!(flow.trace, TraceMode::RetainOnFailure);
        assert_eq!(flow.steps.len(), 7);
        assert_eq!(
            flow.steps[1].action,
            StepAction::WaitField {
                selector: "#user".into(),
                timeout_ms: Some(5000)
            }
        );
        let spec = flow.steps[3].action.value_spec().unwrap();
        assert_eq!(spec.lead_key.as_deref(), Some("subscriber.status"));
        assert!(spec.value_map.is_some());
        assert!(flow.steps[3].when.is_some());
        assert!(flow.steps[4].optional);
        assert_eq!(flow.steps[4].label.as_deref(), Some("cookie banner"));
        assert_eq!(flow.steps[5].action, StepAction::ExitFrame);
        assert_eq!(flow.steps[6].action.type_name(), "type");
    }

    #[test]
    fn parses_yaml_flow() {
        let doc = r##"
platform: acme
slug: login
name: Login
steps:
  - type: enterFrame
    selector: iframe#auth
  - type: pressKey
    key: Enter
  - type: toggle
    selector: "#optin"
    value: true
  - type: comment
    text: done
"##;
        let flow: Flow = serde_yaml::from_str(doc).unwrap();
        assert_eq!(flow.trace, TraceMode::Off);
        assert_eq!(flow.steps.len(), 4);
        assert_eq!(flow.steps[2].action.value_spec().unwrap().value, Some(json!(true)));
    }

    #[test]
    fn explicit_null_is_kept() {
        let cond: WhenCondition =
            serde_json::from_value(json!({ "field": "spouse", "equals": null })).unwrap();
        assert_eq!(cond.op(), ConditionOp::Equals(&Value::Null));
    }

    #[test]
    fn condition_without_operator_is_always() {
        let cond: WhenCondition = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cond.op(), ConditionOp::Always);
    }

    #[test]
    fn value_map_prefers_exact_then_wildcard() {
        let map = ValueMap::new().entry("TNS", "independent").entry("*", "other");
        assert_eq!(map.lookup(Some(&json!("TNS"))), Some(&json!("independent")));
        assert_eq!(map.lookup(Some(&json!("SALARIE"))), Some(&json!("other")));

        let numeric = ValueMap::new().entry("3", "three");
        assert_eq!(numeric.lookup(Some(&json!(3))), Some(&json!("three")));
        assert_eq!(numeric.lookup(Some(&json!(4))), None);
    }

    #[test]
    fn flow_round_trips_through_json() {
        let flow = Flow::new(
            FlowKey::new("acme", "quote"),
            "Quote",
            vec![Step::click("#go").optional().labelled("go")],
        );
        let text = serde_json::to_string(&flow).unwrap();
        let back: Flow = serde_json::from_str(&text).unwrap();
        assert_eq!(back, flow);
    }
}
