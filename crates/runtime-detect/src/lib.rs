//! Runtime detection: evaluates container events against the event rules
//! of a [`policy_engine::RuleSnapshot`], with windowed multi-event
//! correlation and per-container ordered delivery.

pub mod correlation;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod lanes;

pub use correlation::{CorrelationTable, Observed};
pub use error::{CorrelationOverflow, EventError, LaneError};
pub use evaluator::{Evaluation, EvaluatorConfig, EventEvaluator};
pub use event::{Alert, EventRef, RuntimeEvent};
pub use lanes::{EventLanes, EventProcessor, LaneWorkers};
