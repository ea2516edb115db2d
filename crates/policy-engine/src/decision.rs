use serde::{Deserialize, Serialize};

/// The outcome of evaluating an admission request against a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: Outcome,
    /// Failures of `enforce` rules. Non-empty implies `Deny`.
    #[serde(default)]
    pub violations: Vec<RuleViolation>,
    /// Failures of `audit` rules; never affect the outcome.
    #[serde(default)]
    pub advisories: Vec<RuleViolation>,
    /// Version of the snapshot the verdict was computed against.
    pub snapshot_version: u64,
    /// Set only when the verdict is a fail-safe deny after an internal fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
        }
    }
}

/// One rule that the resource failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub message: String,
    #[serde(default)]
    pub failing_paths: Vec<String>,
}

impl Verdict {
    /// Build a verdict from collected failures: denied iff any enforce rule
    /// failed.
    pub fn from_results(
        snapshot_version: u64,
        violations: Vec<RuleViolation>,
        advisories: Vec<RuleViolation>,
    ) -> Self {
        let outcome = if violations.is_empty() {
            Outcome::Allow
        } else {
            Outcome::Deny
        };
        Self {
            outcome,
            violations,
            advisories,
            snapshot_version,
            fault: None,
        }
    }

    /// Allow with nothing to report.
    pub fn allow(snapshot_version: u64) -> Self {
        Self::from_results(snapshot_version, Vec::new(), Vec::new())
    }

    /// Deny because evaluation itself failed.
    pub fn fail_safe(snapshot_version: u64, fault: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Deny,
            violations: Vec::new(),
            advisories: Vec::new(),
            snapshot_version,
            fault: Some(fault.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    /// Human-readable reason suitable for returning to the API client.
    pub fn reason(&self) -> String {
        if let Some(fault) = &self.fault {
            return format!("request denied: policy evaluation failed ({fault})");
        }
        let list = if self.violations.is_empty() {
            &self.advisories
        } else {
            &self.violations
        };
        list.iter()
            .map(|v| format!("{}: {}", v.rule_id, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.violations
            .iter()
            .chain(self.advisories.iter())
            .map(|v| v.rule_id.clone())
            .collect()
    }
}
