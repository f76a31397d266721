//! Scalar property values and their literal encoding in the store.

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use oxigraph::model::vocab::xsd;
use oxigraph::model::Literal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared scalar type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Integer,
    DateTime,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub(crate) fn to_literal(&self) -> Literal {
        match self {
            Value::String(s) => Literal::new_simple_literal(s.as_str()),
            Value::Integer(n) => Literal::new_typed_literal(n.to_string(), xsd::INTEGER),
            Value::DateTime(dt) => Literal::new_typed_literal(
                dt.to_rfc3339_opts(SecondsFormat::Nanos, true),
                xsd::DATE_TIME,
            ),
        }
    }

    /// Decodes a stored literal. `key` only feeds the error message.
    pub(crate) fn from_literal(key: &str, literal: &Literal) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptValue {
            key: key.to_string(),
            reason,
        };
        let datatype = literal.datatype();
        if datatype == xsd::STRING {
            Ok(Value::String(literal.value().to_string()))
        } else if datatype == xsd::INTEGER {
            literal
                .value()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| corrupt(e.to_string()))
        } else if datatype == xsd::DATE_TIME {
            DateTime::parse_from_rfc3339(literal.value())
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|e| corrupt(e.to_string()))
        } else {
            Err(corrupt(format!("unsupported datatype {}", datatype)))
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{}", n),
            Value::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_literal_decoding_keeps_type() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        for value in [
            Value::from("kindergarten"),
            Value::from(42),
            Value::from(when),
        ] {
            let decoded = Value::from_literal("k", &value.to_literal()).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(decoded.value_type(), value.value_type());
        }
    }

    #[test]
    fn test_foreign_datatype_is_corrupt() {
        let literal = Literal::new_typed_literal("true", xsd::BOOLEAN);
        let err = Value::from_literal("flag", &literal).unwrap_err();
        assert!(matches!(err, Error::CorruptValue { ref key, .. } if key == "flag"));
    }
}
