use std::net::SocketAddr;

use async_trait::async_trait;
use policy_engine::{AdmissionRequest, Verdict};
use runtime_detect::{LaneError, RuntimeEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// A frame sent by a client. Text frames carry one JSON object tagged by
/// `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// An admission request; answered with a `verdict` frame carrying the
    /// same `id`.
    Admission { id: String, request: AdmissionRequest },

    /// A runtime event; never answered.
    Event { event: RuntimeEvent },
}

/// A frame sent back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Verdict { id: String, verdict: Verdict },

    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        reason: String,
    },
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(GatewayError::MalformedFrame)
    }
}

/// What can still be read from a text frame that failed to decode.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: Option<String>,
    pub id: Option<String>,
    pub request_uid: Option<String>,
}

impl FrameHeader {
    pub fn salvage(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Self::default();
        };
        let field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_owned);
        Self {
            frame_type: field(&value, "type"),
            id: field(&value, "id"),
            request_uid: value.get("request").and_then(|r| field(r, "uid")),
        }
    }

    pub fn is_admission(&self) -> bool {
        self.frame_type.as_deref() == Some("admission")
    }
}

impl ServerFrame {
    pub fn error(id: Option<String>, reason: impl Into<String>) -> Self {
        ServerFrame::Error {
            id,
            reason: reason.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, GatewayError> {
        serde_json::to_string(self).map_err(GatewayError::Encode)
    }
}

/// Per-connection metadata.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: uuid::Uuid,
    pub remote_addr: SocketAddr,
}

/// Backend the gateway hands decoded frames to.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Decide an admission request without side effects. Runs on the
    /// blocking pool and may be abandoned on timeout.
    fn evaluate(&self, request: &AdmissionRequest) -> Verdict;

    /// Record the verdict the gateway sent for `request`. Called exactly
    /// once per answered request.
    fn record(&self, request: &AdmissionRequest, verdict: &Verdict);

    /// Queue a runtime event for evaluation. May wait for lane capacity.
    async fn ingest(&self, event: RuntimeEvent) -> Result<(), LaneError>;

    /// Version stamped onto verdicts the gateway itself produces.
    fn snapshot_version(&self) -> u64;
}
