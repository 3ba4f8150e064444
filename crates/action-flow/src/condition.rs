//! Step guard evaluation
//!
//! Conditions never fail: a path that does not exist in the lead resolves to
//! "absent", which `isEmpty` treats as empty, `equals`/`oneOf` as no match and
//! `notEquals`/`notOneOf` as a match. Comparisons use JSON structural
//! equality, so `1` and `"1"` differ and objects compare key by key.

use serde_json::Value;

use crate::resolve::lookup;
use crate::types::{ConditionOp, WhenCondition};

/// Evaluate an optional guard against a lead. No guard means run.
pub fn evaluate(condition: Option<&WhenCondition>, lead: &Value) -> bool {
    match condition {
        None => true,
        Some(condition) => evaluate_condition(condition, lead),
    }
}

fn evaluate_condition(condition: &WhenCondition, lead: &Value) -> bool {
    let field = || {
        condition
            .field
            .as_deref()
            .and_then(|path| lookup(lead, path))
    };

    match condition.op() {
        ConditionOp::And(children) => children.iter().all(|child| evaluate_condition(child, lead)),
        ConditionOp::Or(children) => children.iter().any(|child| evaluate_condition(child, lead)),
        ConditionOp::IsEmpty(expect_empty) => is_empty(field()) == expect_empty,
        ConditionOp::Equals(expected) => field() == Some(expected),
        ConditionOp::NotEquals(expected) => field() != Some(expected),
        ConditionOp::OneOf(candidates) => {
            field().is_some_and(|value| candidates.iter().any(|candidate| candidate == value))
        }
        ConditionOp::NotOneOf(candidates) => {
            !field().is_some_and(|value| candidates.iter().any(|candidate| candidate == value))
        }
        ConditionOp::Always => true,
    }
}

/// Absent, null, empty string and empty array count as empty.
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lead() -> Value {
        json!({
            "status": "SALARIE",
            "age": 42,
            "children": [],
            "spouse": null,
            "name": "",
            "project": { "zip": "75001", "options": { "pet": true } }
        })
    }

    #[test]
    fn no_condition_runs() {
        assert!(evaluate(None, &lead()));
    }

    #[test]
    fn empty_combinators() {
        let lead = lead();
        assert!(evaluate(Some(&WhenCondition::all(vec![])), &lead));
        assert!(!evaluate(Some(&WhenCondition::any(vec![])), &lead));
    }

    #[test]
    fn is_empty_covers_absent_null_blank_and_empty_array() {
        let lead = lead();
        for field in ["missing", "spouse", "name", "children", "project.nope.deeper"] {
            assert!(
                evaluate(Some(&WhenCondition::is_empty(field)), &lead),
                "{field} should be empty"
            );
        }
        assert!(!evaluate(Some(&WhenCondition::is_empty("status")), &lead));
        assert!(!evaluate(Some(&WhenCondition::is_empty("age")), &lead));
        assert!(evaluate(Some(&WhenCondition::is_not_empty("project.zip")), &lead));
    }

    #[test]
    fn equality_is_type_sensitive() {
        let lead = lead();
        assert!(evaluate(Some(&WhenCondition::equals("age", 42)), &lead));
        assert!(!evaluate(Some(&WhenCondition::equals("age", "42")), &lead));
        assert!(evaluate(Some(&WhenCondition::not_equals("age", "42")), &lead));
        assert!(evaluate(
            Some(&WhenCondition::equals("project.options", json!({ "pet": true }))),
            &lead
        ));
    }

    #[test]
    fn absent_field_semantics() {
        let lead = lead();
        assert!(!evaluate(Some(&WhenCondition::equals("missing", "x")), &lead));
        assert!(evaluate(Some(&WhenCondition::not_equals("missing", "x")), &lead));
        assert!(!evaluate(Some(&WhenCondition::one_of("missing", vec![json!("x")])), &lead));
        assert!(evaluate(Some(&WhenCondition::not_one_of("missing", vec![json!("x")])), &lead));
        // absent is not null
        assert!(!evaluate(Some(&WhenCondition::equals("missing", Value::Null)), &lead));
        assert!(evaluate(Some(&WhenCondition::equals("spouse", Value::Null)), &lead));
    }

    #[test]
    fn membership() {
        let lead = lead();
        let cond = WhenCondition::one_of("status", vec![json!("TNS"), json!("EXPLOITANT")]);
        assert!(!evaluate(Some(&cond), &lead));
        let cond = WhenCondition::not_one_of("status", vec![json!("TNS"), json!("EXPLOITANT")]);
        assert!(evaluate(Some(&cond), &lead));
        let cond = WhenCondition::one_of("status", vec![json!("SALARIE")]);
        assert!(evaluate(Some(&cond), &lead));
    }

    #[test]
    fn nested_combinators_short_circuit() {
        let lead = lead();
        let cond = WhenCondition::any(vec![
            WhenCondition::equals("status", "TNS"),
            WhenCondition::all(vec![
                WhenCondition::is_not_empty("project.zip"),
                WhenCondition::equals("project.options.pet", true),
            ]),
        ]);
        assert!(evaluate(Some(&cond), &lead));

        let cond = WhenCondition::all(vec![
            WhenCondition::equals("status", "SALARIE"),
            WhenCondition::is_not_empty("children"),
        ]);
        assert!(!evaluate(Some(&cond), &lead));
    }

    #[test]
    fn operator_without_field_uses_absent_value() {
        let lead = lead();
        let cond = WhenCondition {
            is_empty: Some(true),
            ..WhenCondition::default()
        };
        assert!(evaluate(Some(&cond), &lead));
        assert!(evaluate(Some(&WhenCondition::default()), &lead));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let lead = lead();
        let cond = WhenCondition::any(vec![
            WhenCondition::one_of("status", vec![json!("TNS")]),
            WhenCondition::is_empty("children"),
        ]);
        let first = evaluate(Some(&cond), &lead);
        for _ in 0..10 {
            assert_eq!(evaluate(Some(&cond), &lead), first);
        }
    }
}
