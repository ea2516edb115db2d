//! # policy-engine
//!
//! Rule storage and admission-time validation for kubeguard. This crate
//! parses YAML rule definitions, compiles their structural patterns once,
//! publishes them as immutable [`RuleSnapshot`]s through a [`RuleStore`],
//! and evaluates [`AdmissionRequest`]s against the active snapshot.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use policy_engine::{evaluate_admission, AdmissionRequest, Operation, RuleStore};
//!
//! let store = RuleStore::default();
//! store.reload_file("rules.yaml").unwrap();
//!
//! let request = AdmissionRequest {
//!     uid: "1".into(),
//!     kind: "Pod".into(),
//!     namespace: Some("default".into()),
//!     name: Some("web".into()),
//!     operation: Operation::Create,
//!     object: serde_json::json!({"metadata": {"labels": {"app": "web"}}}),
//! };
//! let verdict = evaluate_admission(&store.current(), &request).unwrap();
//! println!("{:?}", verdict.outcome);
//! ```

mod admission;
mod decision;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod path;
pub mod pattern;
mod rule;
mod schema;
mod snapshot;
mod store;
pub mod template;

pub use admission::{evaluate_admission, AdmissionRequest};
pub use decision::{Outcome, RuleViolation, Verdict};
pub use error::{EvaluationError, MatchError, ValidationError};
pub use loader::LoadLimits;
pub use matcher::{evaluate, matches, MatchResult};
pub use path::FieldPath;
pub use pattern::Pattern;
pub use rule::{Correlation, EventRule, PolicyRule, ResourceSelector, Validation};
pub use schema::{
    CorrelationDef, EventRuleDef, ExcludeDef, MatchDef, Operation, PolicyRuleDef,
    RuleDefinitions, Severity, ValidationAction,
};
pub use snapshot::RuleSnapshot;
pub use store::RuleStore;
pub use template::MessageTemplate;
