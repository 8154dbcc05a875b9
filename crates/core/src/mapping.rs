#![forbid(unsafe_code)]

use crate::expr::{self, ExprValue};
use crate::value::ColumnValue;
use serde_json::Value;
use std::collections::BTreeMap;

/// Source directive of a mapping rule, one of:
/// `AUTO`, `DROP:<literal>`, `FUNC(<variable>;<template>)`, or a bare field
/// name referencing the source record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Destination is assigned elsewhere (surrogate key or left empty).
    Auto,
    /// Degenerate pass-through: the destination receives the directive's
    /// own text verbatim. Kept for compatibility, pinned by a test.
    Drop(String),
    /// Substitute the named field into the template and evaluate it with
    /// the closed grammar in [`crate::expr`].
    Func { variable: String, template: String },
    Field(String),
}

impl Directive {
    pub fn parse(raw: &str) -> Result<Self, MappingParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MappingParseError::EmptyDirective);
        }
        if raw == "AUTO" {
            return Ok(Directive::Auto);
        }
        if raw.starts_with("DROP") {
            return Ok(Directive::Drop(raw.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("FUNC(") {
            let Some(inner) = rest.strip_suffix(')') else {
                return Err(MappingParseError::MalformedFunc(raw.to_string()));
            };
            let Some((variable, template)) = inner.split_once(';') else {
                return Err(MappingParseError::MalformedFunc(raw.to_string()));
            };
            let variable = variable.trim();
            let template = template.trim();
            if variable.is_empty() || template.is_empty() {
                return Err(MappingParseError::MalformedFunc(raw.to_string()));
            }
            return Ok(Directive::Func {
                variable: variable.to_string(),
                template: template.to_string(),
            });
        }
        Ok(Directive::Field(raw.to_string()))
    }
}

/// One mapping rule: destination attribute plus its source directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingRule {
    pub attribute: String,
    pub directive: Directive,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MappingParseError {
    EmptyDirective,
    MalformedFunc(String),
    MalformedRow { line: usize },
}

impl std::fmt::Display for MappingParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDirective => write!(f, "empty mapping directive"),
            Self::MalformedFunc(raw) => write!(f, "malformed FUNC directive: {raw}"),
            Self::MalformedRow { line } => {
                write!(f, "mapping row at line {line} is not `attribute,directive`")
            }
        }
    }
}

impl std::error::Error for MappingParseError {}

/// Per-value resolution failure. Always recovered by the caller with a
/// `NULL` substitute; never aborts a row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    MissingField(String),
    EvalFailed { template: String, reason: String },
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "field `{field}` not present in record"),
            Self::EvalFailed { template, reason } => {
                write!(f, "expression `{template}` failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Immutable per-table rule set, loaded once per run from a two-column
/// `attribute,directive` table (header row optional).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingTable {
    rules: Vec<MappingRule>,
}

impl MappingTable {
    pub fn parse(text: &str) -> Result<Self, MappingParseError> {
        let mut rules = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if index == 0 && line.to_ascii_lowercase().starts_with("attribute") {
                continue;
            }
            let Some((attribute, directive)) = line.split_once(',') else {
                return Err(MappingParseError::MalformedRow { line: index + 1 });
            };
            let attribute = attribute.trim();
            if attribute.is_empty() {
                return Err(MappingParseError::MalformedRow { line: index + 1 });
            }
            rules.push(MappingRule {
                attribute: attribute.to_string(),
                directive: Directive::parse(directive)?,
            });
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Resolves one destination value from one source record.
pub fn resolve(rule: &MappingRule, record: &BTreeMap<String, Value>) -> Result<ColumnValue, ResolveError> {
    match &rule.directive {
        Directive::Auto => Ok(ColumnValue::Null),
        Directive::Drop(raw) => Ok(ColumnValue::Text(raw.clone())),
        Directive::Field(field) => match record.get(field) {
            Some(value) => Ok(ColumnValue::from_json(value)),
            None => Err(ResolveError::MissingField(field.clone())),
        },
        Directive::Func { variable, template } => {
            let Some(raw) = record.get(variable) else {
                return Err(ResolveError::MissingField(variable.clone()));
            };
            let Some(bound) = ExprValue::from_json(raw) else {
                return Err(ResolveError::EvalFailed {
                    template: template.clone(),
                    reason: "variable is not text or numeric".to_string(),
                });
            };
            match expr::evaluate(template, variable, &bound) {
                Ok(ExprValue::Number(n)) => Ok(if n.fract() == 0.0 && n.abs() < 1e15 {
                    ColumnValue::Integer(n as i64)
                } else {
                    ColumnValue::Real(n)
                }),
                Ok(ExprValue::Text(s)) => Ok(ColumnValue::Text(s)),
                Err(err) => Err(ResolveError::EvalFailed {
                    template: template.clone(),
                    reason: err.to_string(),
                }),
            }
        }
    }
}
