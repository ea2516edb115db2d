use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use policy_engine::path::display_value;
use policy_engine::{EventRule, RuleSnapshot};
use tracing::debug;

use crate::correlation::{CorrelationTable, ShardedLru};
use crate::error::{CorrelationOverflow, EventError};
use crate::event::{Alert, RuntimeEvent};

/// Sequence numbers remembered per container for duplicate suppression.
const RECENT_SEQUENCES: usize = 64;

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Upper bound on live (rule, key) correlation states.
    pub max_tracked_keys: usize,
    pub shards: usize,
    /// Extra idle time past a rule's window before its state is swept.
    pub grace: Duration,
    /// Containers remembered by the duplicate filter.
    pub max_tracked_containers: usize,
    /// How far an event may be stamped ahead of the local clock.
    pub max_future_skew: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_tracked_keys: 65_536,
            shards: 16,
            grace: Duration::seconds(30),
            max_tracked_containers: 16_384,
            max_future_skew: Duration::minutes(5),
        }
    }
}

/// Result of evaluating one event.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub alerts: Vec<Alert>,
    pub evictions: Vec<CorrelationOverflow>,
    /// The event was a redelivery and was not evaluated.
    pub duplicate: bool,
}

/// Evaluates runtime events against the event rules of a snapshot and owns
/// the correlation state that outlives individual events.
pub struct EventEvaluator {
    correlations: CorrelationTable,
    recent: ShardedLru<String, VecDeque<u64>>,
    max_future_skew: Duration,
}

impl EventEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        Self {
            correlations: CorrelationTable::new(config.max_tracked_keys, config.shards, config.grace),
            recent: ShardedLru::new(config.max_tracked_containers, config.shards),
            max_future_skew: config.max_future_skew,
        }
    }

    /// Evaluate `event` against every event rule in `snapshot`.
    ///
    /// Events for one container must be submitted in order. A redelivered
    /// (container, sequence) pair is ignored. Events stamped further ahead
    /// of the local clock than the configured skew are rejected.
    pub fn submit(&self, snapshot: &RuleSnapshot, event: &RuntimeEvent) -> Result<Evaluation, EventError> {
        let view = event.view()?;
        self.check_clock(event, Utc::now())?;

        if self.is_duplicate(event) {
            debug!(container_id = %event.container_id, sequence = event.sequence, "duplicate event ignored");
            return Ok(Evaluation {
                duplicate: true,
                ..Default::default()
            });
        }

        let mut evaluation = Evaluation::default();
        for rule in snapshot.event_rules() {
            if !rule.triggers_on(&view) {
                continue;
            }
            match &rule.correlation {
                None => evaluation.alerts.push(alert(rule, event, &view, None)),
                Some(correlation) => {
                    let steps = correlation.matching_steps(&view);
                    if steps.is_empty() {
                        continue;
                    }
                    let Some(key) = correlation.key.resolve(&view).map(display_value) else {
                        debug!(
                            rule_id = %rule.id,
                            key = correlation.key.as_str(),
                            "event lacks correlation key, skipped"
                        );
                        continue;
                    };
                    let observed = self.correlations.observe(
                        &rule.id,
                        &key,
                        correlation.window,
                        correlation.sequence.len(),
                        event.timestamp,
                        steps,
                    );
                    evaluation.evictions.extend(observed.overflow);
                    if observed.fired {
                        evaluation.alerts.push(alert(rule, event, &view, Some(key)));
                    }
                }
            }
        }
        Ok(evaluation)
    }

    /// Expire idle correlation state. Returns the number of keys removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let removed = self.correlations.sweep(now);
        if removed > 0 {
            debug!(removed, "expired correlation state swept");
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.correlations.tracked_keys()
    }

    fn check_clock(&self, event: &RuntimeEvent, now: DateTime<Utc>) -> Result<(), EventError> {
        let limit = now
            .checked_add_signed(self.max_future_skew)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if event.timestamp > limit {
            return Err(EventError::FutureTimestamp {
                container_id: event.container_id.clone(),
                sequence: event.sequence,
                timestamp: event.timestamp,
                max_skew_secs: self.max_future_skew.num_seconds(),
            });
        }
        Ok(())
    }

    fn is_duplicate(&self, event: &RuntimeEvent) -> bool {
        let mut shard = self.recent.shard(event.container_id.as_str());
        let seen = shard.get_or_insert_mut(event.container_id.clone(), VecDeque::new);
        if seen.contains(&event.sequence) {
            return true;
        }
        if seen.len() == RECENT_SEQUENCES {
            seen.pop_front();
        }
        seen.push_back(event.sequence);
        false
    }
}

fn alert(rule: &EventRule, event: &RuntimeEvent, view: &serde_json::Value, key: Option<String>) -> Alert {
    Alert {
        id: uuid::Uuid::new_v4(),
        rule_id: rule.id.clone(),
        severity: rule.severity,
        message: rule.message.render(view),
        event: event.reference(),
        correlation_key: key,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_engine::RuleStore;
    use serde_json::json;

    const RULES: &str = r#"
version: "1.0"
event_rules:
  - id: shell-in-container
    severity: warning
    message: "Shell {{ proc.name }} started in {{ container_id }}"
    condition:
      category: exec
      proc: {name: "bash | sh"}
  - id: mount-then-exec
    severity: critical
    message: "Exec after mount in {{ container_id }}"
    correlation:
      window_secs: 10
      sequence:
        - category: mount
        - category: exec
"#;

    fn snapshot() -> std::sync::Arc<RuleSnapshot> {
        RuleStore::default().reload_str(RULES).unwrap()
    }

    fn event(container: &str, seq: u64, at: i64, category: &str, fields: serde_json::Value) -> RuntimeEvent {
        RuntimeEvent {
            timestamp: DateTime::from_timestamp(1_700_000_000 + at, 0).unwrap(),
            container_id: container.into(),
            category: category.into(),
            fields,
            sequence: seq,
        }
    }

    fn ids(evaluation: &Evaluation) -> Vec<&str> {
        evaluation.alerts.iter().map(|a| a.rule_id.as_str()).collect()
    }

    #[test]
    fn single_event_rule_alerts_with_rendered_message() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        let result = evaluator
            .submit(&snapshot, &event("c1", 1, 0, "exec", json!({"proc": {"name": "bash"}})))
            .unwrap();
        assert_eq!(ids(&result), vec!["shell-in-container"]);
        let alert = &result.alerts[0];
        assert_eq!(alert.message, "Shell bash started in c1");
        assert_eq!(alert.severity, policy_engine::Severity::Warning);
        assert_eq!(alert.event.sequence, 1);
        assert!(alert.correlation_key.is_none());
    }

    #[test]
    fn mount_then_exec_within_window_alerts_once() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        let mount = evaluator.submit(&snapshot, &event("c1", 1, 0, "mount", json!({}))).unwrap();
        assert!(mount.alerts.is_empty());

        let exec = evaluator
            .submit(&snapshot, &event("c1", 2, 5, "exec", json!({"proc": {"name": "ls"}})))
            .unwrap();
        assert_eq!(ids(&exec), vec!["mount-then-exec"]);
        assert_eq!(exec.alerts[0].correlation_key.as_deref(), Some("c1"));
        assert_eq!(exec.alerts[0].message, "Exec after mount in c1");
    }

    #[test]
    fn mount_then_exec_outside_window_is_silent() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        evaluator.submit(&snapshot, &event("c1", 1, 0, "mount", json!({}))).unwrap();
        let exec = evaluator
            .submit(&snapshot, &event("c1", 2, 15, "exec", json!({"proc": {"name": "ls"}})))
            .unwrap();
        assert!(exec.alerts.is_empty());
    }

    #[test]
    fn repeated_qualifying_events_alert_once() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        evaluator.submit(&snapshot, &event("c1", 1, 0, "mount", json!({}))).unwrap();

        let correlated: usize = (0..5)
            .map(|i| {
                evaluator
                    .submit(&snapshot, &event("c1", 2 + i, 1 + i as i64, "exec", json!({})))
                    .unwrap()
                    .alerts
                    .iter()
                    .filter(|a| a.rule_id == "mount-then-exec")
                    .count()
            })
            .sum();
        assert_eq!(correlated, 1);
    }

    #[test]
    fn redelivered_event_is_ignored() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        let shell = event("c1", 9, 0, "exec", json!({"proc": {"name": "sh"}}));
        assert_eq!(evaluator.submit(&snapshot, &shell).unwrap().alerts.len(), 1);

        let again = evaluator.submit(&snapshot, &shell).unwrap();
        assert!(again.duplicate);
        assert!(again.alerts.is_empty());

        // Same sequence on another container is a different event.
        let other = event("c2", 9, 0, "exec", json!({"proc": {"name": "sh"}}));
        assert_eq!(evaluator.submit(&snapshot, &other).unwrap().alerts.len(), 1);
    }

    #[test]
    fn event_without_correlation_key_is_skipped() {
        let snapshot = RuleStore::default()
            .reload_str(
                r#"
version: "1.0"
event_rules:
  - id: by-pod
    message: "correlated on pod"
    correlation:
      window_secs: 10
      key: pod.uid
      sequence:
        - category: mount
"#,
            )
            .unwrap();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        let without = evaluator.submit(&snapshot, &event("c1", 1, 0, "mount", json!({}))).unwrap();
        assert!(without.alerts.is_empty());
        assert_eq!(evaluator.tracked_keys(), 0);

        let with = evaluator
            .submit(&snapshot, &event("c1", 2, 1, "mount", json!({"pod": {"uid": "p-1"}})))
            .unwrap();
        assert_eq!(with.alerts[0].correlation_key.as_deref(), Some("p-1"));
    }

    #[test]
    fn malformed_fields_are_an_error() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        let result = evaluator.submit(&snapshot, &event("c1", 1, 0, "exec", json!("bash")));
        assert!(matches!(result, Err(EventError::MalformedFields { .. })));
    }

    #[test]
    fn sweep_drops_expired_state() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig {
            grace: Duration::seconds(5),
            ..Default::default()
        });
        evaluator.submit(&snapshot, &event("c1", 1, 0, "mount", json!({}))).unwrap();
        assert_eq!(evaluator.tracked_keys(), 1);
        let later = DateTime::from_timestamp(1_700_000_000 + 16, 0).unwrap();
        assert_eq!(evaluator.sweep(later), 1);
        assert_eq!(evaluator.tracked_keys(), 0);
    }

    #[test]
    fn events_stamped_too_far_ahead_are_rejected() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig::default());
        let mut shell = event("c1", 1, 0, "exec", json!({"proc": {"name": "sh"}}));

        shell.timestamp = DateTime::<Utc>::MAX_UTC;
        let result = evaluator.submit(&snapshot, &shell);
        assert!(matches!(result, Err(EventError::FutureTimestamp { max_skew_secs: 300, .. })));

        shell.timestamp = Utc::now() + Duration::hours(1);
        assert!(evaluator.submit(&snapshot, &shell).is_err());
        assert_eq!(evaluator.tracked_keys(), 0);

        // Rejected events never reach the duplicate filter.
        shell.timestamp = Utc::now() + Duration::seconds(30);
        assert_eq!(evaluator.submit(&snapshot, &shell).unwrap().alerts.len(), 1);
    }

    #[test]
    fn far_future_state_cannot_break_sweep() {
        let snapshot = snapshot();
        let evaluator = EventEvaluator::new(&EvaluatorConfig {
            max_future_skew: Duration::weeks(52_000_000),
            ..Default::default()
        });
        let mut mount = event("c1", 1, 0, "mount", json!({}));
        mount.timestamp = DateTime::<Utc>::MAX_UTC;
        evaluator.submit(&snapshot, &mount).unwrap();
        assert_eq!(evaluator.tracked_keys(), 1);
        assert_eq!(evaluator.sweep(Utc::now()), 0);
    }
}
