use std::path::Path;
use std::sync::Arc;

use audit_log::{AuditEntry, AuditEventType, AuditRecorder, AuditSource, PolicyDecisionRecord};
use chrono::{DateTime, Utc};
use policy_engine::{
    evaluate_admission, AdmissionRequest, LoadLimits, RuleDefinitions, RuleSnapshot, RuleStore,
    ValidationError, Verdict,
};
use runtime_detect::{Alert, CorrelationOverflow, EvaluatorConfig, EventEvaluator, EventProcessor, RuntimeEvent};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{guarded, InternalFault, Lifecycle, Stage};

const COMPONENT: &str = "decision-engine";

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub limits: LoadLimits,
    pub evaluator: EvaluatorConfig,
}

/// Single entry point for admission requests, runtime events and rule
/// reloads.
///
/// Every request and event reads the active snapshot once and is evaluated
/// entirely against it, even if a reload lands midway.
pub struct DecisionEngine {
    store: RuleStore,
    evaluator: EventEvaluator,
    audit: Arc<dyn AuditRecorder>,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig, audit: Arc<dyn AuditRecorder>) -> Self {
        Self {
            store: RuleStore::new(config.limits),
            evaluator: EventEvaluator::new(&config.evaluator),
            audit,
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.store.current()
    }

    /// Evaluate an admission request and record the verdict. Always
    /// produces a verdict: any fault during evaluation yields a fail-safe
    /// deny.
    pub fn admit(&self, request: &AdmissionRequest) -> Verdict {
        let verdict = self.evaluate(request);
        self.record_verdict(request, &verdict);
        verdict
    }

    /// Decide an admission request without recording anything. Callers
    /// that may abandon the result pair this with [`record_verdict`] for
    /// the verdict they actually return.
    ///
    /// [`record_verdict`]: Self::record_verdict
    pub fn evaluate(&self, request: &AdmissionRequest) -> Verdict {
        let snapshot = self.store.current();
        let mut lifecycle = Lifecycle::received("admission", &request.uid);

        lifecycle.advance(Stage::Evaluating);
        let verdict = match guarded(|| Ok(evaluate_admission(&snapshot, request)?)) {
            Ok(verdict) => {
                lifecycle.advance(Stage::Decided);
                verdict
            }
            Err(fault) => {
                lifecycle.advance(Stage::Failed);
                error!(uid = %request.uid, kind = %request.kind, error = %fault, "admission evaluation failed, denying");
                Verdict::fail_safe(snapshot.version(), fault.to_string())
            }
        };

        debug_assert!(lifecycle.stage().is_terminal());
        debug!(
            uid = %request.uid,
            kind = %request.kind,
            outcome = verdict.outcome.as_str(),
            snapshot = verdict.snapshot_version,
            "admission decided"
        );
        verdict
    }

    /// Write the audit record for a verdict delivered for `request`.
    pub fn record_verdict(&self, request: &AdmissionRequest, verdict: &Verdict) {
        let event_type = if verdict.is_allowed() {
            AuditEventType::AdmissionAllowed
        } else {
            AuditEventType::AdmissionDenied
        };
        let entry = AuditEntry::new(
            event_type,
            AuditSource::new(COMPONENT).with_request_uid(&request.uid),
            json!({
                "kind": request.kind,
                "namespace": request.namespace,
                "name": request.name,
                "operation": request.operation.as_str(),
                "violations": verdict.violations,
                "advisories": verdict.advisories,
                "fault": verdict.fault,
            }),
        )
        .with_policy_decision(PolicyDecisionRecord {
            outcome: verdict.outcome.as_str().to_string(),
            rule_ids: verdict.rule_ids(),
            reason: verdict.reason(),
            snapshot_version: verdict.snapshot_version,
        });
        self.audit.record(entry);
    }

    /// Evaluate one runtime event and return the alerts it raised. Events
    /// for a container must be passed in order.
    pub fn process_event(&self, event: &RuntimeEvent) -> Vec<Alert> {
        let snapshot = self.store.current();
        let id = format!("{}#{}", event.container_id, event.sequence);
        let mut lifecycle = Lifecycle::received("event", &id);

        lifecycle.advance(Stage::Evaluating);
        match guarded(|| Ok(self.evaluator.submit(&snapshot, event)?)) {
            Ok(evaluation) => {
                lifecycle.advance(Stage::Decided);
                for overflow in &evaluation.evictions {
                    self.audit_eviction(overflow);
                }
                for alert in &evaluation.alerts {
                    info!(
                        rule_id = %alert.rule_id,
                        severity = ?alert.severity,
                        container_id = %alert.event.container_id,
                        "{}",
                        alert.message
                    );
                    self.audit_alert(alert);
                }
                evaluation.alerts
            }
            Err(fault) => {
                lifecycle.advance(Stage::Failed);
                error!(
                    container_id = %event.container_id,
                    sequence = event.sequence,
                    error = %fault,
                    "event evaluation failed, dropping"
                );
                self.audit_dropped(event, &fault);
                Vec::new()
            }
        }
    }

    /// Load and activate `defs`; the active snapshot is untouched on error.
    pub fn reload(&self, defs: &RuleDefinitions) -> Result<Arc<RuleSnapshot>, ValidationError> {
        let result = self.store.reload(defs);
        self.audit_reload(&result, None);
        result
    }

    pub fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<Arc<RuleSnapshot>, ValidationError> {
        let path = path.as_ref();
        let result = self.store.reload_file(path);
        self.audit_reload(&result, Some(path));
        result
    }

    /// Expire idle correlation state. A failed sweep is logged and removes
    /// nothing; the next one starts afresh.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        match guarded(|| Ok(self.evaluator.sweep(now))) {
            Ok(removed) => removed,
            Err(fault) => {
                error!(error = %fault, "correlation sweep failed");
                0
            }
        }
    }

    fn audit_alert(&self, alert: &Alert) {
        self.audit.record(AuditEntry::new(
            AuditEventType::AlertRaised,
            AuditSource::new(COMPONENT),
            serde_json::to_value(alert).unwrap_or_default(),
        ));
    }

    fn audit_eviction(&self, overflow: &CorrelationOverflow) {
        self.audit.record(AuditEntry::new(
            AuditEventType::CorrelationEvicted,
            AuditSource::new(COMPONENT),
            json!({
                "rule_id": overflow.rule_id,
                "key": overflow.key,
                "capacity": overflow.capacity,
            }),
        ));
    }

    fn audit_dropped(&self, event: &RuntimeEvent, fault: &InternalFault) {
        self.audit.record(AuditEntry::new(
            AuditEventType::EventDropped,
            AuditSource::new(COMPONENT),
            json!({
                "container_id": event.container_id,
                "sequence": event.sequence,
                "category": event.category,
                "reason": fault.to_string(),
            }),
        ));
    }

    fn audit_reload(&self, result: &Result<Arc<RuleSnapshot>, ValidationError>, path: Option<&Path>) {
        let path = path.map(|p| p.display().to_string());
        let entry = match result {
            Ok(snapshot) => AuditEntry::new(
                AuditEventType::PolicyReloaded,
                AuditSource::new(COMPONENT),
                json!({
                    "path": path,
                    "version": snapshot.version(),
                    "loaded_at": snapshot.loaded_at(),
                    "policies": snapshot.policies().len(),
                    "event_rules": snapshot.event_rules().len(),
                }),
            ),
            Err(e) => {
                warn!(path = ?path, error = %e, "rule reload rejected, keeping active snapshot");
                AuditEntry::new(
                    AuditEventType::PolicyRejected,
                    AuditSource::new(COMPONENT),
                    json!({
                        "path": path,
                        "error": e.to_string(),
                        "active_version": self.store.current().version(),
                    }),
                )
            }
        };
        self.audit.record(entry);
    }
}

impl EventProcessor for DecisionEngine {
    fn process(&self, event: RuntimeEvent) {
        self.process_event(&event);
    }
}
