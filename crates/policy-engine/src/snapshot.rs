use chrono::{DateTime, Utc};

use crate::rule::{EventRule, PolicyRule};

/// An immutable, versioned set of compiled rules.
///
/// Snapshots are only ever shared behind an `Arc`; evaluations hold the one
/// they started with until they finish.
#[derive(Debug)]
pub struct RuleSnapshot {
    version: u64,
    loaded_at: DateTime<Utc>,
    policies: Vec<PolicyRule>,
    event_rules: Vec<EventRule>,
}

impl RuleSnapshot {
    pub(crate) fn new(version: u64, policies: Vec<PolicyRule>, event_rules: Vec<EventRule>) -> Self {
        Self {
            version,
            loaded_at: Utc::now(),
            policies,
            event_rules,
        }
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// The snapshot active before any rules are loaded.
    pub fn empty() -> Self {
        Self::new(0, Vec::new(), Vec::new())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn policies(&self) -> &[PolicyRule] {
        &self.policies
    }

    pub fn event_rules(&self) -> &[EventRule] {
        &self.event_rules
    }

    /// Longest correlation window across all event rules.
    pub fn max_window(&self) -> chrono::Duration {
        self.event_rules
            .iter()
            .filter_map(|r| r.correlation.as_ref().map(|c| c.window))
            .max()
            .unwrap_or_else(chrono::Duration::zero)
    }
}
