//! Static checks run before a flow is scheduled

use crate::errors::FlowError;
use crate::resolve::mentions_credentials;
use crate::types::{Flow, Step, StepAction, ValueSpec, WhenCondition};

/// Reject flows that cannot be interpreted.
pub fn validate_flow(flow: &Flow) -> Result<(), FlowError> {
    let name = flow.key.to_string();
    if flow.key.platform.trim().is_empty() || flow.key.slug.trim().is_empty() {
        return Err(FlowError::ValidationFailed {
            flow: name,
            reason: "platform and slug must not be empty".to_string(),
        });
    }
    if flow.steps.is_empty() {
        return Err(FlowError::ValidationFailed {
            flow: name,
            reason: "flow has no steps".to_string(),
        });
    }

    for (index, step) in flow.steps.iter().enumerate() {
        if let Err(reason) = validate_step(step) {
            return Err(FlowError::InvalidStep {
                flow: name,
                index,
                reason,
            });
        }
    }
    Ok(())
}

fn validate_step(step: &Step) -> Result<(), String> {
    match &step.action {
        StepAction::Goto { url } if url.trim().is_empty() => {
            return Err("goto url is empty".to_string())
        }
        StepAction::PressKey { key, .. } if key.trim().is_empty() => {
            return Err("pressKey key is empty".to_string())
        }
        _ => {}
    }

    if let Some(selector) = step.action.selector() {
        if selector.trim().is_empty() {
            return Err(format!("{} selector is empty", step.action.type_name()));
        }
    }

    if let Some(spec) = step.action.value_spec() {
        if spec.value.is_some() && spec.lead_key.is_some() {
            return Err("value and leadKey are mutually exclusive".to_string());
        }
        if spec.lead_key.as_deref().is_some_and(|key| key.trim().is_empty()) {
            return Err("leadKey is empty".to_string());
        }
    }

    if let Some(condition) = &step.when {
        validate_condition(condition)?;
    }
    Ok(())
}

fn validate_condition(condition: &WhenCondition) -> Result<(), String> {
    let combinator = condition.and.is_some() || condition.or.is_some();
    if !combinator && condition.field.as_deref().map_or(true, |f| f.trim().is_empty()) {
        let has_operator = condition.is_empty.is_some()
            || condition.equals.is_some()
            || condition.not_equals.is_some()
            || condition.one_of.is_some()
            || condition.not_one_of.is_some();
        if has_operator {
            return Err("condition operator without a field".to_string());
        }
    }
    for child in condition.and.iter().chain(condition.or.iter()).flatten() {
        validate_condition(child)?;
    }
    Ok(())
}

/// Whether executing the flow needs platform credentials.
pub fn references_credentials(flow: &Flow) -> bool {
    flow.steps.iter().any(|step| match &step.action {
        StepAction::Goto { url } => mentions_credentials(url),
        StepAction::Type { text, .. } => mentions_credentials(text),
        StepAction::Fill { value, .. }
        | StepAction::Select { value, .. }
        | StepAction::Toggle { value, .. } => spec_mentions_credentials(value),
        _ => false,
    })
}

fn spec_mentions_credentials(spec: &ValueSpec) -> bool {
    let in_value = spec
        .value
        .as_ref()
        .and_then(|value| value.as_str())
        .is_some_and(mentions_credentials);
    let in_key = spec
        .lead_key
        .as_deref()
        .is_some_and(|key| key.starts_with("credentials."));
    in_value || in_key
}
