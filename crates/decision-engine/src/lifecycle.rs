use std::panic::{self, AssertUnwindSafe};

use policy_engine::EvaluationError;
use runtime_detect::EventError;
use thiserror::Error;
use tracing::trace;

/// An unexpected failure inside evaluation. Admission turns it into a
/// fail-safe deny; runtime processing drops the event.
#[derive(Debug, Error)]
pub enum InternalFault {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("evaluation panicked: {0}")]
    Panic(String),
}

/// Where a request or event is in its evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Evaluating,
    Decided,
    Failed,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Received, Stage::Evaluating)
                | (Stage::Evaluating, Stage::Decided)
                | (Stage::Evaluating, Stage::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Decided | Stage::Failed)
    }
}

/// Tracks one request or event through its stages.
#[derive(Debug)]
pub(crate) struct Lifecycle<'a> {
    subject: &'static str,
    id: &'a str,
    stage: Stage,
}

impl<'a> Lifecycle<'a> {
    pub(crate) fn received(subject: &'static str, id: &'a str) -> Self {
        trace!(subject, id, "received");
        Self {
            subject,
            id,
            stage: Stage::Received,
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "{} {}: illegal transition {:?} -> {:?}",
            self.subject,
            self.id,
            self.stage,
            next
        );
        trace!(subject = self.subject, id = self.id, from = ?self.stage, to = ?next, "stage");
        self.stage = next;
    }
}

/// Run `f`, converting a panic into [`InternalFault::Panic`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, InternalFault>) -> Result<T, InternalFault> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(InternalFault::Panic(message))
        }
    }
}
