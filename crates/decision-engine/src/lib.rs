//! Orchestration layer: routes admission requests and runtime events to the
//! policy engine and the runtime evaluator, reloads rule sets, and writes
//! one audit record per verdict and per alert.

mod engine;
pub mod lifecycle;

pub use engine::{DecisionEngine, EngineConfig};
pub use lifecycle::{InternalFault, Stage};
