use std::path::PathBuf;

use thiserror::Error;

/// A rule set could not be turned into a snapshot. Any instance rejects the
/// whole load.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to read rule file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML deserialization failed: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("unsupported rule set version '{0}'; only '1.0' is supported")]
    UnsupportedVersion(String),

    #[error("rule id must not be empty")]
    EmptyRuleId,

    #[error("duplicate rule id: '{0}'")]
    DuplicateRuleId(String),

    #[error("invalid pattern at '{path}': {reason}")]
    InvalidPattern { path: String, reason: String },

    #[error("invalid field path '{path}': {reason}")]
    InvalidFieldPath { path: String, reason: String },

    #[error("invalid message template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("{0}")]
    Invalid(String),

    #[error("rule '{rule}': {source}")]
    InRule {
        rule: String,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    pub(crate) fn in_rule(self, rule: &str) -> Self {
        ValidationError::InRule {
            rule: rule.to_string(),
            source: Box::new(self),
        }
    }
}

/// Why a document failed to satisfy a pattern at a given path.
///
/// Produced during evaluation and collected into a
/// [`MatchResult`](crate::matcher::MatchResult); never propagated as a hard
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("{path}: required field is missing")]
    Missing { path: String },

    #[error("{path}: expected {expected}, found {found}")]
    ShapeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{path}: value does not match pattern")]
    ValueMismatch { path: String },

    #[error("{path}: field must not be present")]
    Forbidden { path: String },
}

impl MatchError {
    pub fn path(&self) -> &str {
        match self {
            MatchError::Missing { path }
            | MatchError::ShapeMismatch { path, .. }
            | MatchError::ValueMismatch { path }
            | MatchError::Forbidden { path } => path,
        }
    }
}

/// Evaluation could not run at all for a request.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    #[error("admission object for {kind} must be a mapping, found {found}")]
    MalformedObject { kind: String, found: &'static str },
}
