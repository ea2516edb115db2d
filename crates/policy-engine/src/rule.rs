use globset::{Glob, GlobMatcher};
use serde_json::Value;

use crate::admission::AdmissionRequest;
use crate::error::ValidationError;
use crate::matcher;
use crate::path::FieldPath;
use crate::pattern::Pattern;
use crate::schema::{Operation, Severity, ValidationAction};
use crate::template::MessageTemplate;

/// Default correlation key when a rule does not name one.
pub const DEFAULT_CORRELATION_KEY: &str = "container_id";

/// A compiled admission validation rule.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub id: String,
    pub description: Option<String>,
    pub action: ValidationAction,
    pub selector: ResourceSelector,
    pub validation: Validation,
    pub message: MessageTemplate,
}

#[derive(Debug, Clone)]
pub enum Validation {
    Pattern(Pattern),
    AnyPattern(Vec<Pattern>),
}

impl Validation {
    /// Evaluate `object`; for `AnyPattern` the first satisfied alternative
    /// wins and otherwise every alternative's failures are reported.
    pub fn evaluate(&self, object: &Value) -> matcher::MatchResult {
        match self {
            Validation::Pattern(pattern) => matcher::evaluate(object, pattern),
            Validation::AnyPattern(patterns) => {
                let mut combined = matcher::MatchResult::default();
                for pattern in patterns {
                    let result = matcher::evaluate(object, pattern);
                    if result.matched {
                        return result;
                    }
                    combined.failures.extend(result.failures);
                }
                combined.matched = false;
                combined
            }
        }
    }
}

/// Which admission requests a [`PolicyRule`] applies to.
#[derive(Debug, Clone)]
pub struct ResourceSelector {
    pub kinds: Vec<String>,
    pub namespaces: Vec<GlobMatcher>,
    pub labels: Option<Pattern>,
    pub operations: Vec<Operation>,
    pub exclude_kinds: Vec<String>,
    pub exclude_namespaces: Vec<GlobMatcher>,
}

impl ResourceSelector {
    pub fn applies_to(&self, request: &AdmissionRequest) -> bool {
        if !self.operations.contains(&request.operation) {
            return false;
        }
        if !self.kinds.iter().any(|k| kind_matches(k, &request.kind)) {
            return false;
        }
        if self.exclude_kinds.iter().any(|k| kind_matches(k, &request.kind)) {
            return false;
        }

        let namespace = request.namespace.as_deref().unwrap_or("");
        if !self.namespaces.is_empty()
            && (namespace.is_empty() || !self.namespaces.iter().any(|g| g.is_match(namespace)))
        {
            return false;
        }
        if !namespace.is_empty() && self.exclude_namespaces.iter().any(|g| g.is_match(namespace)) {
            return false;
        }

        if let Some(labels) = &self.labels {
            let current = request.object.pointer("/metadata/labels");
            if !matcher::evaluate_optional(current, labels).matched {
                return false;
            }
        }

        true
    }
}

fn kind_matches(selector: &str, kind: &str) -> bool {
    selector == "*" || selector == kind
}

pub(crate) fn compile_namespace_globs(patterns: &[String]) -> Result<Vec<GlobMatcher>, ValidationError> {
    patterns
        .iter()
        .map(|p| {
            Glob::new(p)
                .map(|g| g.compile_matcher())
                .map_err(|e| ValidationError::Invalid(format!("invalid namespace glob '{p}': {e}")))
        })
        .collect()
}

/// A compiled runtime detection rule.
#[derive(Debug, Clone)]
pub struct EventRule {
    pub id: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub message: MessageTemplate,
    /// Trigger predicate. For correlated rules this is an extra filter every
    /// step event must also satisfy.
    pub condition: Option<Pattern>,
    pub correlation: Option<Correlation>,
}

impl EventRule {
    /// Does the trigger predicate accept this event view?
    pub fn triggers_on(&self, view: &Value) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |pattern| matcher::matches(view, pattern))
    }
}

/// Windowed, keyed, ordered multi-event condition.
#[derive(Debug, Clone)]
pub struct Correlation {
    pub window: chrono::Duration,
    pub key: FieldPath,
    pub sequence: Vec<Pattern>,
}

impl Correlation {
    /// Indices of the sequence steps this event view satisfies.
    pub fn matching_steps(&self, view: &Value) -> Vec<usize> {
        self.sequence
            .iter()
            .enumerate()
            .filter(|(_, step)| matcher::matches(view, step))
            .map(|(idx, _)| idx)
            .collect()
    }
}
