use serde_json::Value;

use crate::error::MatchError;
use crate::path::display_value;
use crate::pattern::{join, parse_bool, Anchor, Pattern, Scalar};

/// Result of evaluating a document against a pattern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Every failing location, in document order. Empty when `matched`.
    pub failures: Vec<MatchError>,
}

impl MatchResult {
    pub fn failing_paths(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.path().to_string()).collect()
    }
}

/// Does `document` satisfy `pattern`?
pub fn matches(document: &Value, pattern: &Pattern) -> bool {
    let mut failures = Vec::new();
    check(pattern, Some(document), "", &mut failures);
    failures.is_empty()
}

/// Evaluate `document` against `pattern`, collecting every failing path
/// rather than stopping at the first.
pub fn evaluate(document: &Value, pattern: &Pattern) -> MatchResult {
    evaluate_optional(Some(document), pattern)
}

/// Like [`evaluate`] but for a value that may be absent altogether.
pub fn evaluate_optional(document: Option<&Value>, pattern: &Pattern) -> MatchResult {
    let mut failures = Vec::new();
    check(pattern, document, "", &mut failures);
    MatchResult {
        matched: failures.is_empty(),
        failures,
    }
}

fn check(pattern: &Pattern, value: Option<&Value>, path: &str, failures: &mut Vec<MatchError>) {
    let at = || display_path(path);

    match pattern {
        Pattern::Any => {}

        Pattern::NonEmpty => match value {
            None | Some(Value::Null) => failures.push(MatchError::Missing { path: at() }),
            Some(Value::String(s)) if s.is_empty() => {
                failures.push(MatchError::ValueMismatch { path: at() })
            }
            Some(Value::String(_)) | Some(Value::Number(_)) | Some(Value::Bool(_)) => {}
            Some(other) => failures.push(MatchError::ShapeMismatch {
                path: at(),
                expected: "scalar",
                found: kind_of(other),
            }),
        },

        Pattern::Scalar(expected) => match value {
            None => failures.push(MatchError::Missing { path: at() }),
            Some(actual) if scalar_eq(expected, actual) => {}
            Some(other @ (Value::Array(_) | Value::Object(_))) => {
                failures.push(MatchError::ShapeMismatch {
                    path: at(),
                    expected: "scalar",
                    found: kind_of(other),
                })
            }
            Some(_) => failures.push(MatchError::ValueMismatch { path: at() }),
        },

        Pattern::Glob(glob) => match value {
            None | Some(Value::Null) => failures.push(MatchError::Missing { path: at() }),
            Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                if !glob.is_match(&display_value(v)) {
                    failures.push(MatchError::ValueMismatch { path: at() });
                }
            }
            Some(other) => failures.push(MatchError::ShapeMismatch {
                path: at(),
                expected: "scalar",
                found: kind_of(other),
            }),
        },

        Pattern::Alternatives(alternatives) => {
            let any = alternatives.iter().any(|alt| {
                let mut scratch = Vec::new();
                check(alt, value, path, &mut scratch);
                scratch.is_empty()
            });
            if !any {
                if value.is_none() {
                    failures.push(MatchError::Missing { path: at() });
                } else {
                    failures.push(MatchError::ValueMismatch { path: at() });
                }
            }
        }

        Pattern::Not(inner) => {
            let mut scratch = Vec::new();
            check(inner, value, path, &mut scratch);
            if scratch.is_empty() {
                failures.push(MatchError::ValueMismatch { path: at() });
            }
        }

        Pattern::Mapping(fields) => match value {
            None => failures.push(MatchError::Missing { path: at() }),
            Some(Value::Object(map)) => {
                for field in fields {
                    let child_path = join(path, &field.key);
                    let child = map.get(&field.key);
                    match field.anchor {
                        Anchor::Required => check(&field.pattern, child, &child_path, failures),
                        Anchor::Conditional => {
                            if child.is_some() {
                                check(&field.pattern, child, &child_path, failures);
                            }
                        }
                        Anchor::Absent => {
                            if child.is_some() {
                                failures.push(MatchError::Forbidden { path: child_path });
                            }
                        }
                    }
                }
            }
            Some(other) => failures.push(MatchError::ShapeMismatch {
                path: at(),
                expected: "mapping",
                found: kind_of(other),
            }),
        },

        Pattern::Sequence(element) => match value {
            None => failures.push(MatchError::Missing { path: at() }),
            Some(Value::Array(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    check(element, Some(item), &format!("{path}[{idx}]"), failures);
                }
            }
            Some(other) => failures.push(MatchError::ShapeMismatch {
                path: at(),
                expected: "sequence",
                found: kind_of(other),
            }),
        },
    }
}

/// Compare a pattern scalar with a document value after canonicalising
/// booleans and numbers on both sides.
fn scalar_eq(expected: &Scalar, actual: &Value) -> bool {
    match (expected, actual) {
        (Scalar::Null, Value::Null) => true,
        (Scalar::Bool(b), Value::Bool(a)) => a == b,
        (Scalar::Bool(b), Value::String(s)) => parse_bool(s) == Some(*b),
        (Scalar::Number(n), Value::Number(a)) => a.as_f64() == Some(*n),
        (Scalar::Number(n), Value::String(s)) => s.trim().parse::<f64>().ok() == Some(*n),
        (Scalar::String(s), Value::String(a)) => a == s,
        (Scalar::String(s), Value::Number(a)) => a.to_string() == *s,
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pat(v: Value) -> Pattern {
        Pattern::compile(&v).expect("pattern should compile")
    }

    // ---- scalars ----

    #[test]
    fn exact_scalars_without_wildcards() {
        let p = pat(json!({"spec": {"replicas": 3, "serviceName": "web"}}));
        assert!(matches(&json!({"spec": {"replicas": 3, "serviceName": "web", "x": 1}}), &p));
        assert!(!matches(&json!({"spec": {"replicas": 2, "serviceName": "web"}}), &p));
        assert!(!matches(&json!({"spec": {"replicas": 3}}), &p));
    }

    #[test]
    fn non_empty_wildcard() {
        let p = pat(json!({"app": "?*"}));
        assert!(matches(&json!({"app": "x"}), &p));
        assert!(!matches(&json!({"app": ""}), &p));
        assert!(!matches(&json!({}), &p));
        assert!(!matches(&json!({"app": null}), &p));
        assert!(!matches(&json!({"app": {"nested": 1}}), &p));
    }

    #[test]
    fn star_matches_anything_including_absence() {
        let p = pat(json!({"app": "*"}));
        assert!(matches(&json!({"app": ""}), &p));
        assert!(matches(&json!({"app": [1, 2]}), &p));
        assert!(matches(&json!({}), &p));
    }

    #[test]
    fn prefix_glob_matches_strings() {
        let p = pat(json!({"image": "registry.corp/*"}));
        assert!(matches(&json!({"image": "registry.corp/team/app:1.0"}), &p));
        assert!(!matches(&json!({"image": "docker.io/library/nginx"}), &p));
        assert!(!matches(&json!({}), &p));
    }

    #[test]
    fn booleans_compare_canonically() {
        let quoted = pat(json!({"privileged": "false"}));
        assert!(matches(&json!({"privileged": false}), &quoted));
        assert!(matches(&json!({"privileged": "false"}), &quoted));
        assert!(!matches(&json!({"privileged": true}), &quoted));

        let typed = pat(json!({"privileged": false}));
        assert!(matches(&json!({"privileged": "False"}), &typed));
        assert!(!matches(&json!({"privileged": "no"}), &typed));
    }

    #[test]
    fn numbers_compare_numerically() {
        let p = pat(json!({"port": 8080}));
        assert!(matches(&json!({"port": 8080.0}), &p));
        assert!(matches(&json!({"port": "8080"}), &p));
        assert!(!matches(&json!({"port": 80}), &p));
    }

    // ---- sequences ----

    #[test]
    fn sequence_pattern_constrains_every_element() {
        let p = pat(json!({"containers": [{"privileged": false}]}));
        assert!(matches(
            &json!({"containers": [{"privileged": false}, {"privileged": false}]}),
            &p
        ));
        assert!(!matches(
            &json!({"containers": [{"privileged": false}, {"privileged": true}]}),
            &p
        ));
        assert!(matches(&json!({"containers": []}), &p));
    }

    #[test]
    fn sequence_failures_report_indexed_paths() {
        let p = pat(json!({"spec": {"containers": [{"securityContext": {"privileged": "false"}}]}}));
        let doc = json!({"spec": {"containers": [
            {"securityContext": {"privileged": false}},
            {"securityContext": {"privileged": true}},
            {"name": "no-context"}
        ]}});
        let result = evaluate(&doc, &p);
        assert!(!result.matched);
        assert_eq!(
            result.failing_paths(),
            vec![
                "spec.containers[1].securityContext.privileged",
                "spec.containers[2].securityContext",
            ]
        );
    }

    #[test]
    fn shape_mismatch_is_a_failed_match() {
        let p = pat(json!({"spec": {"containers": [{"name": "?*"}]}}));
        let result = evaluate(&json!({"spec": {"containers": "oops"}}), &p);
        assert!(!result.matched);
        assert_eq!(
            result.failures,
            vec![MatchError::ShapeMismatch {
                path: "spec.containers".into(),
                expected: "sequence",
                found: "string",
            }]
        );
    }

    // ---- anchors and operators ----

    #[test]
    fn conditional_anchor_skips_absent_keys() {
        let p = pat(json!({"containers": [{"=(securityContext)": {"=(privileged)": "false"}}]}));
        assert!(matches(&json!({"containers": [{"name": "a"}]}), &p));
        assert!(matches(&json!({"containers": [{"securityContext": {}}]}), &p));
        assert!(!matches(
            &json!({"containers": [{"securityContext": {"privileged": true}}]}),
            &p
        ));
    }

    #[test]
    fn absence_anchor_forbids_keys() {
        let p = pat(json!({"spec": {"X(hostPath)": null}}));
        assert!(matches(&json!({"spec": {}}), &p));
        let result = evaluate(&json!({"spec": {"hostPath": {"path": "/"}}}), &p);
        assert_eq!(
            result.failures,
            vec![MatchError::Forbidden {
                path: "spec.hostPath".into()
            }]
        );
    }

    #[test]
    fn alternatives_and_negation_operators() {
        let p = pat(json!({"imagePullPolicy": "Always | IfNotPresent"}));
        assert!(matches(&json!({"imagePullPolicy": "Always"}), &p));
        assert!(!matches(&json!({"imagePullPolicy": "Never"}), &p));

        let p = pat(json!({"image": "!*:latest"}));
        assert!(matches(&json!({"image": "nginx:1.25"}), &p));
        assert!(!matches(&json!({"image": "nginx:latest"}), &p));
    }

    #[test]
    fn evaluate_optional_absent_document() {
        let p = pat(json!({"app": "?*"}));
        let result = evaluate_optional(None, &p);
        assert!(!result.matched);
        assert_eq!(result.failing_paths(), vec!["<root>"]);
        assert!(evaluate_optional(None, &pat(json!("*"))).matched);
    }
}
