use serde_json::Value;

use crate::error::ValidationError;
use crate::path::{display_value, FieldPath};

/// Rendered in place of a placeholder whose path does not resolve.
pub const UNRESOLVED: &str = "<unknown>";

/// A message with `{{ field.path }}` placeholders, parsed at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    source: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(FieldPath),
}

impl MessageTemplate {
    pub fn parse(source: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidTemplate {
            template: source.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| invalid("unclosed '{{'"))?;
            let path = FieldPath::parse(&after[..end]).map_err(|e| invalid(&e.to_string()))?;
            parts.push(Part::Field(path));
            rest = &after[end + 2..];
        }
        if rest.contains("}}") {
            return Err(invalid("unmatched '}}'"));
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_placeholders(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Field(_)))
    }

    pub fn render(&self, context: &Value) -> String {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Field(path) => match path.resolve(context) {
                    Some(value) => out.push_str(&display_value(value)),
                    None => out.push_str(UNRESOLVED),
                },
            }
        }
        out
    }
}
