use regex::Regex;
use serde_json::Value;

use crate::error::ValidationError;

/// Deepest nesting a pattern may have. Bounds the evaluation walk.
pub const MAX_PATTERN_DEPTH: usize = 32;

/// A compiled structural pattern.
///
/// Built once from a rule definition at load time and evaluated by
/// [`crate::matcher`] against arbitrary JSON-shaped documents.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// `"*"`: any value, including absence.
    Any,
    /// `"?*"`: any non-empty scalar.
    NonEmpty,
    /// Exact scalar comparison with boolean/number canonicalisation.
    Scalar(Scalar),
    /// String glob with `*` and `?` wildcards.
    Glob(Glob),
    /// `a | b`: any alternative matches.
    Alternatives(Vec<Pattern>),
    /// `!value`: the inner pattern must not match.
    Not(Box<Pattern>),
    /// Open-world mapping: listed fields must match, others are ignored.
    Mapping(Vec<FieldPattern>),
    /// One-element sequence applied to every element of the document sequence.
    Sequence(Box<Pattern>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone)]
pub struct Glob {
    regex: Regex,
}

impl Glob {
    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }
}

/// How a mapping key participates in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Plain key: must be present and match.
    Required,
    /// `=(key)`: checked only when present.
    Conditional,
    /// `X(key)`: must be absent.
    Absent,
}

#[derive(Debug, Clone)]
pub struct FieldPattern {
    pub key: String,
    pub anchor: Anchor,
    pub pattern: Pattern,
}

impl Pattern {
    /// Compile a declarative pattern value.
    pub fn compile(value: &Value) -> Result<Self, ValidationError> {
        compile_at(value, "", 0)
    }
}

fn compile_at(value: &Value, path: &str, depth: usize) -> Result<Pattern, ValidationError> {
    if depth > MAX_PATTERN_DEPTH {
        return Err(invalid(path, format!("nesting exceeds {MAX_PATTERN_DEPTH} levels")));
    }

    match value {
        Value::Null => Ok(Pattern::Scalar(Scalar::Null)),
        Value::Bool(b) => Ok(Pattern::Scalar(Scalar::Bool(*b))),
        Value::Number(n) => n
            .as_f64()
            .map(|f| Pattern::Scalar(Scalar::Number(f)))
            .ok_or_else(|| invalid(path, format!("unrepresentable number {n}"))),
        Value::String(s) => compile_string(s, path),
        Value::Array(items) => {
            if items.len() != 1 {
                return Err(invalid(
                    path,
                    format!(
                        "sequence pattern must contain exactly one element, found {}",
                        items.len()
                    ),
                ));
            }
            let element = compile_at(&items[0], &format!("{path}[0]"), depth + 1)?;
            Ok(Pattern::Sequence(Box::new(element)))
        }
        Value::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (raw_key, child) in map {
                let (key, anchor) = parse_anchor(raw_key, path)?;
                let child_path = join(path, key);
                let pattern = compile_at(child, &child_path, depth + 1)?;
                fields.push(FieldPattern {
                    key: key.to_string(),
                    anchor,
                    pattern,
                });
            }
            Ok(Pattern::Mapping(fields))
        }
    }
}

fn compile_string(raw: &str, path: &str) -> Result<Pattern, ValidationError> {
    if raw.contains('|') {
        let alternatives = raw
            .split('|')
            .map(|alt| {
                let alt = alt.trim();
                if alt.is_empty() {
                    Err(invalid(path, format!("empty alternative in '{raw}'")))
                } else {
                    compile_token(alt, path)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Pattern::Alternatives(alternatives));
    }
    compile_token(raw, path)
}

fn compile_token(token: &str, path: &str) -> Result<Pattern, ValidationError> {
    if let Some(rest) = token.strip_prefix('!') {
        if rest.is_empty() {
            return Err(invalid(path, "negation '!' needs an operand".to_string()));
        }
        return Ok(Pattern::Not(Box::new(compile_token(rest, path)?)));
    }

    match token {
        "*" => return Ok(Pattern::Any),
        "?*" => return Ok(Pattern::NonEmpty),
        _ => {}
    }

    if token.contains("***") {
        return Err(invalid(path, format!("unrecognised wildcard token in '{token}'")));
    }

    if token.contains('*') || token.contains('?') {
        let regex_str = format!("^{}$", glob_to_regex(token));
        let regex = Regex::new(&regex_str)
            .map_err(|e| invalid(path, format!("invalid glob '{token}': {e}")))?;
        return Ok(Pattern::Glob(Glob { regex }));
    }

    if let Some(b) = parse_bool(token) {
        return Ok(Pattern::Scalar(Scalar::Bool(b)));
    }

    Ok(Pattern::Scalar(Scalar::String(token.to_string())))
}

/// Split `=(key)` / `X(key)` anchors off a mapping key.
fn parse_anchor<'a>(raw: &'a str, path: &str) -> Result<(&'a str, Anchor), ValidationError> {
    let (key, anchor) = if let Some(inner) = raw.strip_prefix("=(").and_then(|r| r.strip_suffix(')')) {
        (inner, Anchor::Conditional)
    } else if let Some(inner) = raw.strip_prefix("X(").and_then(|r| r.strip_suffix(')')) {
        (inner, Anchor::Absent)
    } else if raw.starts_with("=(") || raw.starts_with("X(") {
        return Err(invalid(path, format!("unterminated anchor '{raw}'")));
    } else {
        (raw, Anchor::Required)
    };

    if key.trim().is_empty() {
        return Err(invalid(path, "mapping key must not be empty".to_string()));
    }
    Ok((key, anchor))
}

/// Canonical boolean reading of a string: `true`/`false` in any case.
pub fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Convert a glob (`*` any run, `?` one char) into an unanchored regex
/// fragment.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' | '|' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn invalid(path: &str, reason: String) -> ValidationError {
    ValidationError::InvalidPattern {
        path: if path.is_empty() { "<root>".to_string() } else { path.to_string() },
        reason,
    }
}
