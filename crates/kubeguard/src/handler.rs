use std::sync::Arc;

use async_trait::async_trait;
use decision_engine::DecisionEngine;
use policy_engine::{AdmissionRequest, Verdict};
use runtime_detect::{EventLanes, LaneError, RuntimeEvent};
use ws_gateway::RequestHandler;

/// Connects the gateway to the decision engine: admissions are decided
/// on the caller's thread and recorded once answered, events go through the
/// ordered lanes.
pub struct EngineHandler {
    engine: Arc<DecisionEngine>,
    lanes: EventLanes,
}

impl EngineHandler {
    pub fn new(engine: Arc<DecisionEngine>, lanes: EventLanes) -> Self {
        Self { engine, lanes }
    }
}

#[async_trait]
impl RequestHandler for EngineHandler {
    fn evaluate(&self, request: &AdmissionRequest) -> Verdict {
        self.engine.evaluate(request)
    }

    fn record(&self, request: &AdmissionRequest, verdict: &Verdict) {
        self.engine.record_verdict(request, verdict);
    }

    async fn ingest(&self, event: RuntimeEvent) -> Result<(), LaneError> {
        self.lanes.submit(event).await
    }

    fn snapshot_version(&self) -> u64 {
        self.engine.snapshot().version()
    }
}
