use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::decision::{RuleViolation, Verdict};
use crate::error::EvaluationError;
use crate::schema::{Operation, ValidationAction};
use crate::snapshot::RuleSnapshot;

/// A proposed cluster object change awaiting an accept/reject decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    #[serde(default)]
    pub uid: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub operation: Operation,
    /// The resource document.
    pub object: Value,
}

impl AdmissionRequest {
    /// Root document for message placeholders (`{{ request.object.* }}`,
    /// `{{ request.namespace }}`, ...).
    fn template_context(&self) -> Value {
        serde_json::json!({
            "request": {
                "uid": self.uid,
                "kind": self.kind,
                "namespace": self.namespace,
                "name": self.name,
                "operation": self.operation.as_str(),
                "object": self.object,
            }
        })
    }
}

/// Evaluate every applicable policy rule in `snapshot` against `request`.
///
/// All rules run; none short-circuits. The request is denied if any
/// `enforce` rule fails, and `audit` failures are reported as advisories.
pub fn evaluate_admission(
    snapshot: &RuleSnapshot,
    request: &AdmissionRequest,
) -> Result<Verdict, EvaluationError> {
    if !request.object.is_object() {
        return Err(EvaluationError::MalformedObject {
            kind: request.kind.clone(),
            found: match request.object {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "sequence",
                Value::Object(_) => "mapping",
            },
        });
    }

    debug!(
        uid = %request.uid,
        kind = %request.kind,
        namespace = request.namespace.as_deref().unwrap_or(""),
        operation = request.operation.as_str(),
        snapshot = snapshot.version(),
        "evaluating admission request"
    );

    let mut violations = Vec::new();
    let mut advisories = Vec::new();
    let mut context: Option<Value> = None;

    for rule in snapshot.policies() {
        if !rule.selector.applies_to(request) {
            continue;
        }

        let result = rule.validation.evaluate(&request.object);
        if result.matched {
            trace!(rule = %rule.id, "rule satisfied");
            continue;
        }

        let message = if rule.message.has_placeholders() {
            let ctx = context.get_or_insert_with(|| request.template_context());
            rule.message.render(ctx)
        } else {
            rule.message.source().to_string()
        };

        trace!(rule = %rule.id, action = ?rule.action, failures = result.failures.len(), "rule failed");

        let violation = RuleViolation {
            rule_id: rule.id.clone(),
            message,
            failing_paths: result.failing_paths(),
        };
        match rule.action {
            ValidationAction::Enforce => violations.push(violation),
            ValidationAction::Audit => advisories.push(violation),
        }
    }

    Ok(Verdict::from_results(snapshot.version(), violations, advisories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Outcome;
    use crate::loader::{compile_snapshot, parse_definitions, LoadLimits};
    use serde_json::json;

    fn snapshot_from_yaml(yaml: &str) -> RuleSnapshot {
        let defs = parse_definitions(yaml).expect("test YAML should parse");
        compile_snapshot(&defs, 1, &LoadLimits::default()).expect("rules should compile")
    }

    fn pod(namespace: &str, object: Value) -> AdmissionRequest {
        AdmissionRequest {
            uid: "req-1".into(),
            kind: "Pod".into(),
            namespace: Some(namespace.into()),
            name: object
                .pointer("/metadata/name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            operation: Operation::Create,
            object,
        }
    }

    const PRIVILEGED_RULE: &str = r#"
version: "1.0"
policies:
  - id: disallow-privileged
    match: {kinds: [Pod]}
    message: "Privileged mode is disallowed"
    pattern:
      spec:
        containers:
          - securityContext:
              privileged: "false"
"#;

    #[test]
    fn privileged_container_is_denied() {
        let snapshot = snapshot_from_yaml(PRIVILEGED_RULE);
        let req = pod(
            "default",
            json!({"spec": {"containers": [{"securityContext": {"privileged": true}}]}}),
        );
        let verdict = evaluate_admission(&snapshot, &req).unwrap();
        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].rule_id, "disallow-privileged");
        assert_eq!(
            verdict.violations[0].failing_paths,
            vec!["spec.containers[0].securityContext.privileged"]
        );
    }

    #[test]
    fn unprivileged_container_is_allowed() {
        let snapshot = snapshot_from_yaml(PRIVILEGED_RULE);
        let req = pod(
            "default",
            json!({"spec": {"containers": [{"securityContext": {"privileged": false}}]}}),
        );
        assert!(evaluate_admission(&snapshot, &req).unwrap().is_allowed());
    }

    #[test]
    fn missing_label_is_denied_with_message() {
        let snapshot = snapshot_from_yaml(
            r#"
version: "1.0"
policies:
  - id: require-app-label
    match: {kinds: [Pod]}
    message: "Missing required label 'app'"
    pattern:
      metadata:
        labels:
          app: "?*"
"#,
        );
        let req = pod("default", json!({"metadata": {"name": "web", "labels": {"tier": "fe"}}}));
        let verdict = evaluate_admission(&snapshot, &req).unwrap();
        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.violations[0].message, "Missing required label 'app'");
    }

    #[test]
    fn audit_rules_only_advise() {
        let snapshot = snapshot_from_yaml(
            r#"
version: "1.0"
policies:
  - id: no-latest
    action: audit
    match: {kinds: [Pod]}
    message: "{{ request.name }} uses a floating tag"
    pattern:
      spec:
        containers:
          - image: "!*:latest"
"#,
        );
        let req = pod(
            "default",
            json!({"metadata": {"name": "web"}, "spec": {"containers": [{"image": "nginx:latest"}]}}),
        );
        let verdict = evaluate_admission(&snapshot, &req).unwrap();
        assert!(verdict.is_allowed());
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.advisories.len(), 1);
        assert_eq!(verdict.advisories[0].message, "web uses a floating tag");
    }

    #[test]
    fn every_rule_is_evaluated() {
        let snapshot = snapshot_from_yaml(
            r#"
version: "1.0"
policies:
  - id: need-app
    match: {kinds: [Pod]}
    message: "app label"
    pattern: {metadata: {labels: {app: "?*"}}}
  - id: need-team
    match: {kinds: [Pod]}
    message: "team label"
    pattern: {metadata: {labels: {team: "?*"}}}
  - id: probes
    action: audit
    match: {kinds: [Pod]}
    message: "probes"
    pattern: {spec: {containers: [{livenessProbe: "?*"}]}}
"#,
        );
        let req = pod("default", json!({"metadata": {}, "spec": {"containers": [{}]}}));
        let verdict = evaluate_admission(&snapshot, &req).unwrap();
        let ids: Vec<&str> = verdict.violations.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["need-app", "need-team"]);
        assert_eq!(verdict.advisories.len(), 1);
    }

    #[test]
    fn selector_scopes_rules() {
        let snapshot = snapshot_from_yaml(
            r#"
version: "1.0"
policies:
  - id: prod-only
    match:
      kinds: [Pod, Deployment]
      namespaces: ["prod-*"]
      labels: {tier: "frontend | backend"}
    exclude:
      namespaces: [prod-sandbox]
    message: "needs owner"
    pattern: {metadata: {annotations: {owner: "?*"}}}
"#,
        );
        let object = json!({"metadata": {"labels": {"tier": "frontend"}}});

        let denied = evaluate_admission(&snapshot, &pod("prod-eu", object.clone())).unwrap();
        assert_eq!(denied.outcome, Outcome::Deny);

        let other_ns = evaluate_admission(&snapshot, &pod("dev", object.clone())).unwrap();
        assert!(other_ns.is_allowed());

        let excluded = evaluate_admission(&snapshot, &pod("prod-sandbox", object.clone())).unwrap();
        assert!(excluded.is_allowed());

        let unlabelled = pod("prod-eu", json!({"metadata": {"labels": {"tier": "batch"}}}));
        assert!(evaluate_admission(&snapshot, &unlabelled).unwrap().is_allowed());

        let mut service = pod("prod-eu", object.clone());
        service.kind = "Service".into();
        assert!(evaluate_admission(&snapshot, &service).unwrap().is_allowed());

        let mut deletion = pod("prod-eu", object);
        deletion.operation = Operation::Delete;
        assert!(evaluate_admission(&snapshot, &deletion).unwrap().is_allowed());
    }

    #[test]
    fn any_pattern_needs_one_alternative() {
        let snapshot = snapshot_from_yaml(
            r#"
version: "1.0"
policies:
  - id: probes
    match: {kinds: [Pod]}
    message: "a probe is required"
    any_pattern:
      - spec: {containers: [{livenessProbe: "?*"}]}
      - spec: {containers: [{readinessProbe: "?*"}]}
"#,
        );
        let ready = pod("default", json!({"spec": {"containers": [{"readinessProbe": "http"}]}}));
        assert!(evaluate_admission(&snapshot, &ready).unwrap().is_allowed());

        let none = pod("default", json!({"spec": {"containers": [{}]}}));
        let verdict = evaluate_admission(&snapshot, &none).unwrap();
        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.violations[0].failing_paths.len(), 2);
    }

    #[test]
    fn non_mapping_object_is_an_evaluation_error() {
        let snapshot = snapshot_from_yaml(PRIVILEGED_RULE);
        let mut req = pod("default", json!({}));
        req.object = json!("not a document");
        let err = evaluate_admission(&snapshot, &req).unwrap_err();
        assert!(err.to_string().contains("must be a mapping"));
    }
}
