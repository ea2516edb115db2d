use serde::{Deserialize, Serialize};

/// A single audit record describing a verdict, an alert, or an engine
/// lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_decision: Option<PolicyDecisionRecord>,
}

impl AuditEntry {
    /// Create a new `AuditEntry` with a fresh UUID v4 and the current UTC
    /// timestamp. `policy_decision` defaults to `None`.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
            policy_decision: None,
        }
    }

    /// Attach a policy decision record, builder-style.
    pub fn with_policy_decision(mut self, decision: PolicyDecisionRecord) -> Self {
        self.policy_decision = Some(decision);
        self
    }
}

/// The category of audit event being recorded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AdmissionAllowed,
    AdmissionDenied,
    AlertRaised,
    EventDropped,
    CorrelationEvicted,
    PolicyReloaded,
    PolicyRejected,
    ConnectionOpened,
    ConnectionClosed,
    ProcessStarted,
    ProcessStopped,
}

/// Identifies the component that produced the record plus optional
/// request/connection context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_uid: Option<String>,
}

impl AuditSource {
    /// Convenience constructor that only requires the component name.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            remote_addr: None,
            connection_id: None,
            request_uid: None,
        }
    }

    pub fn with_request_uid(mut self, uid: impl Into<String>) -> Self {
        self.request_uid = Some(uid.into());
        self
    }

    pub fn with_connection(mut self, connection_id: impl ToString, remote_addr: impl ToString) -> Self {
        self.connection_id = Some(connection_id.to_string());
        self.remote_addr = Some(remote_addr.to_string());
        self
    }
}

/// Outcome of an admission evaluation attached to an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecisionRecord {
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_ids: Vec<String>,
    pub reason: String,
    pub snapshot_version: u64,
}
