//! JSON predicate matching for automation trigger conditions.
//!
//! A predicate is a tree of logical combinators over leaf matchers. Each
//! leaf binds a key path within the subject JSON to a value matcher.
//! Evaluation is pure and total: malformed or type-mismatched input
//! degrades to a non-match, never an error. An automation that never
//! fires is safer than one that fires on corrupt input.

use crate::version::VersionConstraint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A composable boolean predicate over JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JsonPredicate {
    /// True iff all children are true. Empty = true.
    And { children: Vec<JsonPredicate> },
    /// True iff any child is true. Empty = false.
    Or { children: Vec<JsonPredicate> },
    /// Negation of a single child.
    Not { child: Box<JsonPredicate> },
    /// A leaf matcher.
    Matcher(JsonMatcher),
}

/// A leaf matcher binding a key path to a value matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonMatcher {
    /// Object segments descended before resolving `key`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    /// Dot-separated path within the scoped value. `None` matches the
    /// scoped value itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Matcher applied to the resolved value.
    pub value: JsonValueMatcher,
}

/// Matcher over a single resolved JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JsonValueMatcher {
    /// Type-strict equality: a number never equals its string form.
    #[serde(rename_all = "camelCase")]
    Equals { expected: Value },
    /// Numeric lower bound, inclusive.
    #[serde(rename_all = "camelCase")]
    AtLeast { min: f64 },
    /// Numeric upper bound, inclusive.
    #[serde(rename_all = "camelCase")]
    AtMost { max: f64 },
    /// Inclusive numeric range.
    #[serde(rename_all = "camelCase")]
    Range { min: f64, max: f64 },
    /// Presence (`true`) or absence (`false`) of the value.
    #[serde(rename_all = "camelCase")]
    IsPresent { present: bool },
    /// Semantic-version comparator against a string value.
    #[serde(rename_all = "camelCase")]
    VersionMatches { constraint: VersionConstraint },
    /// Applies a nested predicate to each array element; true if any
    /// element matches.
    #[serde(rename_all = "camelCase")]
    ArrayContains { predicate: Box<JsonPredicate> },
}

impl JsonPredicate {
    /// Conjunction over children.
    pub fn and(children: Vec<JsonPredicate>) -> Self {
        JsonPredicate::And { children }
    }

    /// Disjunction over children.
    pub fn or(children: Vec<JsonPredicate>) -> Self {
        JsonPredicate::Or { children }
    }

    /// Negation.
    pub fn not(child: JsonPredicate) -> Self {
        JsonPredicate::Not {
            child: Box::new(child),
        }
    }

    /// Leaf matcher on a dot-separated key path.
    pub fn matcher(key: impl Into<String>, value: JsonValueMatcher) -> Self {
        JsonPredicate::Matcher(JsonMatcher {
            scope: Vec::new(),
            key: Some(key.into()),
            value,
        })
    }

    /// Leaf matcher applied to the subject value itself.
    pub fn value_matcher(value: JsonValueMatcher) -> Self {
        JsonPredicate::Matcher(JsonMatcher {
            scope: Vec::new(),
            key: None,
            value,
        })
    }

    /// Evaluate this predicate against a JSON value.
    ///
    /// Pure and total. Safe to call concurrently from any number of
    /// callers; no shared mutable state.
    pub fn matches(&self, subject: &Value) -> bool {
        match self {
            JsonPredicate::And { children } => children.iter().all(|c| c.matches(subject)),
            JsonPredicate::Or { children } => children.iter().any(|c| c.matches(subject)),
            JsonPredicate::Not { child } => !child.matches(subject),
            JsonPredicate::Matcher(matcher) => matcher.matches(subject),
        }
    }
}

impl JsonMatcher {
    /// Resolve the key path and apply the value matcher.
    pub fn matches(&self, subject: &Value) -> bool {
        self.value.matches(self.resolve(subject))
    }

    /// Resolve scope then key against the subject. A missing path is an
    /// absent value, matched only by an explicit is-absent matcher.
    fn resolve<'a>(&self, subject: &'a Value) -> Option<&'a Value> {
        let mut current = subject;
        for segment in &self.scope {
            current = current.get(segment)?;
        }
        match &self.key {
            None => Some(current),
            Some(key) => {
                for segment in key.split('.') {
                    current = current.get(segment)?;
                }
                Some(current)
            }
        }
    }
}

impl JsonValueMatcher {
    /// Apply this matcher to a resolved value (`None` = absent).
    pub fn matches(&self, resolved: Option<&Value>) -> bool {
        match self {
            JsonValueMatcher::IsPresent { present } => resolved.is_some() == *present,
            JsonValueMatcher::Equals { expected } => resolved == Some(expected),
            JsonValueMatcher::AtLeast { min } => {
                resolved.and_then(Value::as_f64).is_some_and(|n| n >= *min)
            }
            JsonValueMatcher::AtMost { max } => {
                resolved.and_then(Value::as_f64).is_some_and(|n| n <= *max)
            }
            JsonValueMatcher::Range { min, max } => resolved
                .and_then(Value::as_f64)
                .is_some_and(|n| n >= *min && n <= *max),
            JsonValueMatcher::VersionMatches { constraint } => resolved
                .and_then(Value::as_str)
                .is_some_and(|s| constraint.matches_str(s)),
            JsonValueMatcher::ArrayContains { predicate } => resolved
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|item| predicate.matches(item))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{SemanticVersion, VersionConstraint};
    use serde_json::json;

    fn equals(key: &str, expected: Value) -> JsonPredicate {
        JsonPredicate::matcher(key, JsonValueMatcher::Equals { expected })
    }

    fn at_least(key: &str, min: f64) -> JsonPredicate {
        JsonPredicate::matcher(key, JsonValueMatcher::AtLeast { min })
    }

    #[test]
    fn empty_and_is_true() {
        assert!(JsonPredicate::and(vec![]).matches(&json!({})));
    }

    #[test]
    fn empty_or_is_false() {
        assert!(!JsonPredicate::or(vec![]).matches(&json!({})));
    }

    #[test]
    fn and_requires_all_children() {
        let p = JsonPredicate::and(vec![
            equals("status", json!("active")),
            at_least("score", 10.0),
        ]);

        assert!(!p.matches(&json!({"status": "active", "score": 5})));
        assert!(p.matches(&json!({"status": "active", "score": 15})));
        assert!(!p.matches(&json!({"status": "inactive", "score": 15})));
    }

    #[test]
    fn or_short_circuits() {
        let p = JsonPredicate::or(vec![
            equals("a", json!(1)),
            equals("b", json!(2)),
        ]);
        assert!(p.matches(&json!({"b": 2})));
        assert!(!p.matches(&json!({"a": 2, "b": 3})));
    }

    #[test]
    fn not_negates() {
        let p = JsonPredicate::not(equals("status", json!("active")));
        assert!(p.matches(&json!({"status": "inactive"})));
        assert!(!p.matches(&json!({"status": "active"})));
    }

    #[test]
    fn equality_is_type_strict() {
        let p = equals("score", json!(5));
        assert!(p.matches(&json!({"score": 5})));
        // A numeric value never equals its string representation
        assert!(!p.matches(&json!({"score": "5"})));

        let p = equals("flag", json!("true"));
        assert!(!p.matches(&json!({"flag": true})));
    }

    #[test]
    fn missing_path_is_absent() {
        let present = JsonPredicate::matcher("name", JsonValueMatcher::IsPresent { present: true });
        let absent = JsonPredicate::matcher("name", JsonValueMatcher::IsPresent { present: false });

        assert!(present.matches(&json!({"name": "x"})));
        assert!(!present.matches(&json!({})));
        assert!(absent.matches(&json!({})));
        assert!(!absent.matches(&json!({"name": null})));
    }

    #[test]
    fn missing_path_fails_equality() {
        let p = equals("missing", json!(1));
        assert!(!p.matches(&json!({"other": 1})));
    }

    #[test]
    fn dotted_key_path_descends() {
        let p = equals("user.address.city", json!("Oslo"));
        assert!(p.matches(&json!({"user": {"address": {"city": "Oslo"}}})));
        assert!(!p.matches(&json!({"user": {"address": {}}})));
    }

    #[test]
    fn scope_applies_before_key() {
        let p = JsonPredicate::Matcher(JsonMatcher {
            scope: vec!["event".into(), "data".into()],
            key: Some("amount".into()),
            value: JsonValueMatcher::AtLeast { min: 100.0 },
        });
        assert!(p.matches(&json!({"event": {"data": {"amount": 150}}})));
        assert!(!p.matches(&json!({"data": {"amount": 150}})));
    }

    #[test]
    fn numeric_bounds_are_inclusive() {
        let p = JsonPredicate::matcher("n", JsonValueMatcher::Range { min: 1.0, max: 3.0 });
        assert!(p.matches(&json!({"n": 1})));
        assert!(p.matches(&json!({"n": 3.0})));
        assert!(!p.matches(&json!({"n": 3.01})));
        // Non-numbers fail numeric comparison
        assert!(!p.matches(&json!({"n": "2"})));
    }

    #[test]
    fn version_matcher() {
        let p = JsonPredicate::matcher(
            "app_version",
            JsonValueMatcher::VersionMatches {
                constraint: VersionConstraint::AtLeast {
                    min: SemanticVersion::new(2, 1, 0),
                },
            },
        );
        assert!(p.matches(&json!({"app_version": "2.1"})));
        assert!(p.matches(&json!({"app_version": "3.0.0"})));
        assert!(!p.matches(&json!({"app_version": "2.0.9"})));
        // Malformed version strings never satisfy version constraints
        assert!(!p.matches(&json!({"app_version": "2.x"})));
        assert!(!p.matches(&json!({"app_version": 2.1})));
    }

    #[test]
    fn array_contains_any_match() {
        let p = JsonPredicate::matcher(
            "tags",
            JsonValueMatcher::ArrayContains {
                predicate: Box::new(JsonPredicate::value_matcher(JsonValueMatcher::Equals {
                    expected: json!("vip"),
                })),
            },
        );
        assert!(p.matches(&json!({"tags": ["standard", "vip", "beta"]})));
        assert!(!p.matches(&json!({"tags": ["standard"]})));
        assert!(!p.matches(&json!({"tags": "vip"})));
        assert!(!p.matches(&json!({})));
    }

    #[test]
    fn array_contains_nested_objects() {
        let p = JsonPredicate::matcher(
            "items",
            JsonValueMatcher::ArrayContains {
                predicate: Box::new(equals("sku", json!("A-1"))),
            },
        );
        assert!(p.matches(&json!({"items": [{"sku": "B-2"}, {"sku": "A-1"}]})));
        assert!(!p.matches(&json!({"items": [{"sku": "B-2"}]})));
    }

    #[test]
    fn malformed_subject_degrades_to_non_match() {
        let p = at_least("score", 10.0);
        assert!(!p.matches(&json!(null)));
        assert!(!p.matches(&json!("not an object")));
        assert!(!p.matches(&json!([1, 2, 3])));
    }

    #[test]
    fn serialization_round_trip() {
        let p = JsonPredicate::and(vec![
            equals("status", json!("active")),
            JsonPredicate::not(JsonPredicate::matcher(
                "score",
                JsonValueMatcher::AtMost { max: 9.0 },
            )),
        ]);

        let encoded = serde_json::to_string(&p).unwrap();
        assert!(encoded.contains("\"type\":\"and\""));
        let parsed: JsonPredicate = serde_json::from_str(&encoded).unwrap();
        assert_eq!(p, parsed);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(json!({})),
                any::<i64>().prop_map(|n| json!({ "score": n })),
                "[a-z]{0,8}".prop_map(|s| json!({ "status": s })),
                (any::<i64>(), "[a-z]{0,8}")
                    .prop_map(|(n, s)| json!({ "score": n, "status": s })),
            ]
        }

        fn arb_predicate() -> impl Strategy<Value = JsonPredicate> {
            let leaf = prop_oneof![
                any::<i64>().prop_map(|n| JsonPredicate::matcher(
                    "score",
                    JsonValueMatcher::AtLeast { min: n as f64 }
                )),
                "[a-z]{0,8}".prop_map(|s| JsonPredicate::matcher(
                    "status",
                    JsonValueMatcher::Equals { expected: json!(s) }
                )),
                Just(JsonPredicate::matcher(
                    "status",
                    JsonValueMatcher::IsPresent { present: false }
                )),
            ];
            leaf.prop_recursive(3, 16, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..3).prop_map(JsonPredicate::and),
                    prop::collection::vec(inner.clone(), 0..3).prop_map(JsonPredicate::or),
                    inner.prop_map(JsonPredicate::not),
                ]
            })
        }

        proptest! {
            #[test]
            fn prop_double_negation(p in arb_predicate(), v in arb_value()) {
                let double = JsonPredicate::not(JsonPredicate::not(p.clone()));
                prop_assert_eq!(double.matches(&v), p.matches(&v));
            }

            #[test]
            fn prop_evaluation_is_deterministic(p in arb_predicate(), v in arb_value()) {
                prop_assert_eq!(p.matches(&v), p.matches(&v));
            }
        }
    }
}
