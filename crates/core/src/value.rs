#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// A single relational column value. `Null` is the relational NULL concept,
/// never the string "NULL" (a legitimate text value "NULL" stays text).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts an attribute pulled out of a JSON document. Nested arrays
    /// and objects are kept as their JSON text form.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    Self::Real(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Row-emission normalization: semantically empty text and
    /// not-a-number collapse to `Null`.
    pub fn normalized(self) -> Self {
        match self {
            Self::Text(s) if s.trim().is_empty() => Self::Null,
            Self::Real(r) if r.is_nan() => Self::Null,
            other => other,
        }
    }

    /// Backpropagation coercion: `Null` and NaN become the empty string so
    /// sidecar sections never carry a synthetic "NULL" marker.
    pub fn to_document_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::String(String::new()),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Real(r) if r.is_nan() => serde_json::Value::String(String::new()),
            Self::Real(r) => serde_json::Value::from(*r),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_and_nan_normalize_to_null() {
        assert!(ColumnValue::Text(String::new()).normalized().is_null());
        assert!(ColumnValue::Text("   ".to_string()).normalized().is_null());
        assert!(ColumnValue::Real(f64::NAN).normalized().is_null());
        assert_eq!(
            ColumnValue::Text("sub-CF07".to_string()).normalized(),
            ColumnValue::Text("sub-CF07".to_string())
        );
    }

    #[test]
    fn null_string_stays_text() {
        let v = ColumnValue::Text("NULL".to_string()).normalized();
        assert_eq!(v, ColumnValue::Text("NULL".to_string()));
        assert!(!v.is_null());
    }

    #[test]
    fn document_coercion_replaces_null_with_empty() {
        assert_eq!(
            ColumnValue::Null.to_document_json(),
            serde_json::Value::String(String::new())
        );
        assert_eq!(
            ColumnValue::Integer(7).to_document_json(),
            serde_json::json!(7)
        );
    }

    #[test]
    fn serde_round_trip_keeps_null_distinct() {
        let values = vec![
            ColumnValue::Null,
            ColumnValue::Integer(3),
            ColumnValue::Text("NULL".to_string()),
        ];
        let text = serde_json::to_string(&values).expect("serialize");
        let back: Vec<ColumnValue> = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, values);
    }
}
