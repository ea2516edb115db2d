use std::collections::HashSet;
use std::path::Path;

use crate::error::ValidationError;
use crate::path::FieldPath;
use crate::pattern::Pattern;
use crate::rule::{
    compile_namespace_globs, Correlation, EventRule, PolicyRule, ResourceSelector, Validation,
    DEFAULT_CORRELATION_KEY,
};
use crate::schema::{EventRuleDef, Operation, PolicyRuleDef, RuleDefinitions};
use crate::snapshot::RuleSnapshot;
use crate::template::MessageTemplate;

/// Bounds applied while compiling rule definitions.
#[derive(Debug, Clone, Copy)]
pub struct LoadLimits {
    /// Longest correlation window a rule may declare.
    pub max_window_secs: u64,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            max_window_secs: 3600,
        }
    }
}

/// Read [`RuleDefinitions`] from a YAML file on disk.
pub fn read_definitions(path: impl AsRef<Path>) -> Result<RuleDefinitions, ValidationError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ValidationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_definitions(&contents)
}

/// Parse [`RuleDefinitions`] from a YAML string and check the version gate.
pub fn parse_definitions(yaml: &str) -> Result<RuleDefinitions, ValidationError> {
    let defs: RuleDefinitions = serde_yml::from_str(yaml)?;
    if defs.version != "1.0" {
        return Err(ValidationError::UnsupportedVersion(defs.version));
    }
    Ok(defs)
}

/// Validate and compile every rule into a snapshot. The first invalid rule
/// fails the whole set.
pub fn compile_snapshot(
    defs: &RuleDefinitions,
    version: u64,
    limits: &LoadLimits,
) -> Result<RuleSnapshot, ValidationError> {
    check_unique_ids(defs.policies.iter().map(|p| p.id.as_str()))?;
    check_unique_ids(defs.event_rules.iter().map(|r| r.id.as_str()))?;

    let policies = defs
        .policies
        .iter()
        .map(|def| compile_policy(def).map_err(|e| e.in_rule(&def.id)))
        .collect::<Result<Vec<_>, _>>()?;

    let event_rules = defs
        .event_rules
        .iter()
        .map(|def| compile_event_rule(def, limits).map_err(|e| e.in_rule(&def.id)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RuleSnapshot::new(version, policies, event_rules))
}

fn check_unique_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyRuleId);
        }
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateRuleId(id.to_string()));
        }
    }
    Ok(())
}

fn compile_policy(def: &PolicyRuleDef) -> Result<PolicyRule, ValidationError> {
    let validation = match (&def.pattern, def.any_pattern.as_slice()) {
        (Some(pattern), []) => Validation::Pattern(Pattern::compile(pattern)?),
        (None, alternatives) if !alternatives.is_empty() => Validation::AnyPattern(
            alternatives
                .iter()
                .map(Pattern::compile)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        (Some(_), _) => {
            return Err(ValidationError::Invalid(
                "'pattern' and 'any_pattern' are mutually exclusive".to_string(),
            ))
        }
        (None, _) => {
            return Err(ValidationError::Invalid(
                "one of 'pattern' or 'any_pattern' is required".to_string(),
            ))
        }
    };

    let m = &def.match_resources;
    if m.kinds.is_empty() || m.kinds.iter().any(|k| k.trim().is_empty()) {
        return Err(ValidationError::Invalid(
            "match.kinds must list at least one non-empty kind".to_string(),
        ));
    }

    let operations = if m.operations.is_empty() {
        vec![Operation::Create, Operation::Update]
    } else {
        m.operations.clone()
    };

    let labels = m.labels.as_ref().map(Pattern::compile).transpose()?;
    let exclude = def.exclude.clone().unwrap_or_default();

    let selector = ResourceSelector {
        kinds: m.kinds.clone(),
        namespaces: compile_namespace_globs(&m.namespaces)?,
        labels,
        operations,
        exclude_kinds: exclude.kinds,
        exclude_namespaces: compile_namespace_globs(&exclude.namespaces)?,
    };

    Ok(PolicyRule {
        id: def.id.clone(),
        description: def.description.clone(),
        action: def.action,
        selector,
        validation,
        message: MessageTemplate::parse(&def.message)?,
    })
}

fn compile_event_rule(def: &EventRuleDef, limits: &LoadLimits) -> Result<EventRule, ValidationError> {
    let condition = def.condition.as_ref().map(Pattern::compile).transpose()?;

    let correlation = match &def.correlation {
        None => {
            if condition.is_none() {
                return Err(ValidationError::Invalid(
                    "a rule without correlation needs a 'condition'".to_string(),
                ));
            }
            None
        }
        Some(corr) => {
            if corr.window_secs == 0 {
                return Err(ValidationError::Invalid(
                    "correlation.window_secs must be greater than zero".to_string(),
                ));
            }
            if corr.window_secs > limits.max_window_secs {
                return Err(ValidationError::Invalid(format!(
                    "correlation.window_secs {} exceeds the maximum of {}",
                    corr.window_secs, limits.max_window_secs
                )));
            }
            if corr.sequence.is_empty() {
                return Err(ValidationError::Invalid(
                    "correlation.sequence must list at least one step".to_string(),
                ));
            }
            let key = FieldPath::parse(corr.key.as_deref().unwrap_or(DEFAULT_CORRELATION_KEY))?;
            let sequence = corr
                .sequence
                .iter()
                .map(Pattern::compile)
                .collect::<Result<Vec<_>, _>>()?;
            Some(Correlation {
                window: chrono::Duration::seconds(corr.window_secs as i64),
                key,
                sequence,
            })
        }
    };

    Ok(EventRule {
        id: def.id.clone(),
        description: def.description.clone(),
        severity: def.severity,
        message: MessageTemplate::parse(&def.message)?,
        condition,
        correlation,
    })
}
