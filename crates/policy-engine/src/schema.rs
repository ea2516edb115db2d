use serde::{Deserialize, Serialize};

/// Top-level rule definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinitions {
    /// Schema version; currently must be "1.0".
    pub version: String,
    /// Admission-time validation rules, evaluated in order.
    #[serde(default)]
    pub policies: Vec<PolicyRuleDef>,
    /// Runtime detection rules, evaluated in order.
    #[serde(default)]
    pub event_rules: Vec<EventRuleDef>,
}

/// A single admission validation rule as written by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRuleDef {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action: ValidationAction,
    #[serde(rename = "match")]
    pub match_resources: MatchDef,
    #[serde(default)]
    pub exclude: Option<ExcludeDef>,
    /// Failure message; may contain `{{ request.* }}` placeholders.
    pub message: String,
    /// Pattern every applicable resource must satisfy.
    #[serde(default)]
    pub pattern: Option<serde_json::Value>,
    /// Alternative patterns; the resource must satisfy at least one.
    #[serde(default)]
    pub any_pattern: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAction {
    /// A failing resource is denied.
    #[default]
    Enforce,
    /// A failing resource is admitted with an advisory.
    Audit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchDef {
    /// Resource kinds (e.g. `Pod`); `"*"` matches any kind.
    pub kinds: Vec<String>,
    /// Namespace globs; empty means any namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Pattern applied to `metadata.labels`.
    #[serde(default)]
    pub labels: Option<serde_json::Value>,
    /// Operations in scope; empty means create and update.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeDef {
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Connect => "connect",
        }
    }
}

/// A runtime detection rule as written by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRuleDef {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    /// Alert message; may contain placeholders resolved against the event.
    pub message: String,
    /// Trigger predicate over the event view. Required unless a
    /// `correlation.sequence` is given.
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
    #[serde(default)]
    pub correlation: Option<CorrelationDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationDef {
    pub window_secs: u64,
    /// Field path of the correlation key; defaults to `container_id`.
    #[serde(default)]
    pub key: Option<String>,
    /// Ordered steps that must all be observed inside the window.
    pub sequence: Vec<serde_json::Value>,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Notice,
    #[default]
    Warning,
    Error,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_definitions() {
        let yaml = r#"
version: "1.0"
"#;
        let defs: RuleDefinitions = serde_yml::from_str(yaml).unwrap();
        assert_eq!(defs.version, "1.0");
        assert!(defs.policies.is_empty());
        assert!(defs.event_rules.is_empty());
    }

    #[test]
    fn deserialize_full_definitions() {
        let yaml = r#"
version: "1.0"
policies:
  - id: disallow-privileged
    description: "Privileged containers can access all host devices"
    action: enforce
    match:
      kinds: [Pod]
      namespaces: ["prod-*"]
      operations: [create]
    exclude:
      namespaces: [kube-system]
    message: "Privileged mode is disallowed"
    pattern:
      spec:
        containers:
          - =(securityContext):
              =(privileged): "false"
  - id: require-probes
    action: audit
    match:
      kinds: [Pod]
    message: "Probes are recommended"
    any_pattern:
      - spec: {containers: [{livenessProbe: "*"}]}
      - spec: {containers: [{readinessProbe: "*"}]}
event_rules:
  - id: shell-with-sensitive-mount
    severity: critical
    message: "Shell {{ proc.name }} in {{ container_id }}"
    correlation:
      window_secs: 10
      sequence:
        - {category: mount, mount: {source: "/etc*"}}
        - {category: exec, proc: {name: "bash | sh"}}
"#;
        let defs: RuleDefinitions = serde_yml::from_str(yaml).unwrap();
        assert_eq!(defs.policies.len(), 2);

        let p0 = &defs.policies[0];
        assert_eq!(p0.action, ValidationAction::Enforce);
        assert_eq!(p0.match_resources.kinds, vec!["Pod"]);
        assert_eq!(p0.match_resources.operations, vec![Operation::Create]);
        assert_eq!(p0.exclude.as_ref().unwrap().namespaces, vec!["kube-system"]);
        assert!(p0.pattern.is_some());

        let p1 = &defs.policies[1];
        assert_eq!(p1.action, ValidationAction::Audit);
        assert_eq!(p1.any_pattern.len(), 2);

        let e0 = &defs.event_rules[0];
        assert_eq!(e0.severity, Severity::Critical);
        let corr = e0.correlation.as_ref().unwrap();
        assert_eq!(corr.window_secs, 10);
        assert!(corr.key.is_none());
        assert_eq!(corr.sequence.len(), 2);
    }

    #[test]
    fn action_and_severity_defaults() {
        let yaml = r#"
version: "1.0"
policies:
  - id: p
    match: {kinds: ["*"]}
    message: m
    pattern: {metadata: {name: "?*"}}
event_rules:
  - id: e
    message: m
    condition: {category: exec}
"#;
        let defs: RuleDefinitions = serde_yml::from_str(yaml).unwrap();
        assert_eq!(defs.policies[0].action, ValidationAction::Enforce);
        assert_eq!(defs.event_rules[0].severity, Severity::Warning);
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Info < Severity::Notice);
    }
}
