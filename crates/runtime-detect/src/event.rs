use chrono::{DateTime, Utc};
use policy_engine::Severity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

/// A discrete runtime observation from a capture agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub timestamp: DateTime<Utc>,
    pub container_id: String,
    /// e.g. `exec`, `open`, `mount`, `connect`.
    pub category: String,
    /// Structured payload, same shape as an admission document.
    #[serde(default = "empty_fields")]
    pub fields: Value,
    /// Monotonic per container.
    pub sequence: u64,
}

fn empty_fields() -> Value {
    Value::Object(Map::new())
}

impl RuntimeEvent {
    /// The document rules are matched against: the payload fields plus
    /// `category`, `container_id` and `sequence` at the top level.
    pub fn view(&self) -> Result<Value, EventError> {
        let mut map = match &self.fields {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(EventError::MalformedFields {
                    container_id: self.container_id.clone(),
                    sequence: self.sequence,
                })
            }
        };
        map.insert("category".into(), Value::String(self.category.clone()));
        map.insert("container_id".into(), Value::String(self.container_id.clone()));
        map.insert("sequence".into(), Value::from(self.sequence));
        Ok(Value::Object(map))
    }

    pub fn reference(&self) -> EventRef {
        EventRef {
            container_id: self.container_id.clone(),
            sequence: self.sequence,
            category: self.category.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Identifies the event that triggered an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub container_id: String,
    pub sequence: u64,
    pub category: String,
    pub timestamp: DateTime<Utc>,
}

/// A runtime detection result. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: uuid::Uuid,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub event: EventRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}
